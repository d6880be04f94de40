// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod database;
mod logging;
mod webhooks;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use webhooks::{
	RetryConfig, RetryConfigLayer, RetryStrategy, WebhooksConfig, WebhooksConfigLayer,
	DEFAULT_RETRY_SCHEDULE_SECS,
};
