// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound webhook delivery engine.
//!
//! A producer calls [`DispatchRouter::dispatch`] with a domain event. The
//! router matches the event against active subscriptions, records one
//! [`Delivery`] per match and enqueues it. A [`DeliveryWorker`] picks each
//! delivery up, the [`DeliveryExecutor`] signs and POSTs it, and the
//! [`RetryScheduler`] re-enqueues retriable failures with backoff until the
//! subscription's retry budget is spent.
//!
//! Delivery is at-least-once. Receivers dedupe on `X-Webhook-Delivery-Id`.

pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod matcher;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod validation;
pub mod worker;

pub use engine::{EngineOptions, WebhookEngine};
pub use error::{Result, WebhookError};
pub use events::{EventPattern, EventTaxonomy, TEST_EVENT};
pub use executor::DeliveryExecutor;
pub use matcher::matches;
pub use retry::RetryPolicy;
pub use router::{DispatchRouter, ProducerHandle};
pub use scheduler::{RetryDecision, RetryScheduler};
pub use settings::DeliverySettings;
pub use sqlite::SqliteWebhookStore;
pub use store::{InMemoryWebhookStore, WebhookStore};
pub use types::{Delivery, DeliveryStatus, Outcome, WebhookPayload, WebhookSubscription};
pub use worker::{recover, DeliveryTask, DeliveryWorker};
