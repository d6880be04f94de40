// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the Beacon webhook server.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod testing;
pub mod types;
pub mod webhook;

pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use types::{
	GuardedUpdate, WebhookDeliveryRecord, WebhookSubscriptionRecord, TERMINAL_DELIVERY_STATUSES,
	UNFINISHED_DELIVERY_STATUSES,
};
pub use webhook::WebhookRepository;
