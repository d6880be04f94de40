// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use beacon_common_webhook::SigningSecret;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Delivery statuses the store refuses to overwrite.
pub const TERMINAL_DELIVERY_STATUSES: [&str; 2] = ["success", "permanently_failed"];

/// Delivery statuses picked up again after a restart.
pub const UNFINISHED_DELIVERY_STATUSES: [&str; 3] = ["pending", "in_flight", "retrying"];

#[derive(Debug, Clone)]
pub struct WebhookSubscriptionRecord {
	pub id: Uuid,
	pub tenant_id: Uuid,
	pub name: String,
	pub url: String,
	pub secret: SigningSecret,
	pub events: Vec<String>,
	pub headers: BTreeMap<String, String>,
	pub timeout_secs: i64,
	pub max_retries: i64,
	pub is_active: bool,
	pub success_count: i64,
	pub failure_count: i64,
	pub consecutive_failures: i64,
	pub last_success_at: Option<DateTime<Utc>>,
	pub last_failure_at: Option<DateTime<Utc>>,
	pub disabled_at: Option<DateTime<Utc>>,
	pub disabled_reason: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDeliveryRecord {
	pub id: Uuid,
	pub webhook_id: Uuid,
	pub event: String,
	pub payload: serde_json::Value,
	pub status: String,
	pub attempt: i64,
	pub response_status: Option<i64>,
	pub response_body: Option<String>,
	pub response_time_ms: Option<i64>,
	pub error_message: Option<String>,
	pub next_retry_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Result of a guarded delivery update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedUpdate {
	Applied,
	Missing,
	/// The stored record is already terminal and was left untouched.
	Terminal { status: String },
	/// The write would have lowered the stored attempt counter.
	StaleAttempt { stored: i64 },
}
