// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use beacon_common_webhook::SigningSecret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Time past the request timeout after which an `in_flight` attempt is
/// presumed abandoned and may be taken over.
pub const IN_FLIGHT_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
	Pending,
	InFlight,
	Retrying,
	Success,
	PermanentlyFailed,
}

impl DeliveryStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			DeliveryStatus::Pending => "pending",
			DeliveryStatus::InFlight => "in_flight",
			DeliveryStatus::Retrying => "retrying",
			DeliveryStatus::Success => "success",
			DeliveryStatus::PermanentlyFailed => "permanently_failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, DeliveryStatus::Success | DeliveryStatus::PermanentlyFailed)
	}
}

impl std::str::FromStr for DeliveryStatus {
	type Err = ();
	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"pending" => Ok(DeliveryStatus::Pending),
			"in_flight" => Ok(DeliveryStatus::InFlight),
			"retrying" => Ok(DeliveryStatus::Retrying),
			"success" => Ok(DeliveryStatus::Success),
			"permanently_failed" => Ok(DeliveryStatus::PermanentlyFailed),
			_ => Err(()),
		}
	}
}

impl fmt::Display for DeliveryStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Classification of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Success,
	Retriable,
	Permanent,
}

/// A tenant endpoint and the events it wants.
///
/// The signing secret is redacted in Debug and Serialize output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
	pub id: Uuid,
	pub tenant_id: Uuid,
	pub name: String,
	pub url: String,
	pub secret: SigningSecret,
	pub events: Vec<String>,
	pub headers: BTreeMap<String, String>,
	pub timeout: Duration,
	pub max_retries: u32,
	pub is_active: bool,
	pub success_count: u64,
	pub failure_count: u64,
	pub consecutive_failures: u32,
	pub last_success_at: Option<DateTime<Utc>>,
	pub last_failure_at: Option<DateTime<Utc>>,
	pub disabled_at: Option<DateTime<Utc>>,
	pub disabled_reason: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
	/// New active subscription with a freshly generated secret.
	pub fn new(
		tenant_id: Uuid,
		name: impl Into<String>,
		url: impl Into<String>,
		events: Vec<String>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: Uuid::new_v4(),
			tenant_id,
			name: name.into(),
			url: url.into(),
			secret: SigningSecret::generate(),
			events,
			headers: BTreeMap::new(),
			timeout: DEFAULT_TIMEOUT,
			max_retries: DEFAULT_MAX_RETRIES,
			is_active: true,
			success_count: 0,
			failure_count: 0,
			consecutive_failures: 0,
			last_success_at: None,
			last_failure_at: None,
			disabled_at: None,
			disabled_reason: None,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn with_secret(mut self, secret: SigningSecret) -> Self {
		self.secret = secret;
		self
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	pub fn is_subscribed_to(&self, event: &str) -> bool {
		crate::matcher::matches(self, event)
	}
}

/// One attempt-sequence notifying one subscription of one event occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
	pub id: Uuid,
	pub subscription_id: Uuid,
	pub event: String,
	pub payload: serde_json::Value,
	pub status: DeliveryStatus,
	pub attempt: u32,
	pub response_status: Option<u16>,
	pub response_body: Option<String>,
	pub response_time_ms: Option<u64>,
	pub error_message: Option<String>,
	pub next_retry_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Delivery {
	pub fn new(subscription_id: Uuid, event: impl Into<String>, payload: serde_json::Value) -> Self {
		let now = Utc::now();
		Self {
			id: Uuid::new_v4(),
			subscription_id,
			event: event.into(),
			payload,
			status: DeliveryStatus::Pending,
			attempt: 0,
			response_status: None,
			response_body: None,
			response_time_ms: None,
			error_message: None,
			next_retry_at: None,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// True while an `in_flight` attempt started after `lease_cutoff` may still
	/// be running somewhere.
	pub fn is_held(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
		self.status == DeliveryStatus::InFlight && self.updated_at >= lease_cutoff(timeout, now)
	}

	pub(crate) fn touch(&mut self) {
		self.updated_at = Utc::now();
	}
}

/// `in_flight` rows last touched before this instant are free to claim again.
pub fn lease_cutoff(timeout: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
	chrono::Duration::from_std(timeout.saturating_add(IN_FLIGHT_GRACE))
		.ok()
		.and_then(|lease| now.checked_sub_signed(lease))
		.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Request body sent to subscribers. Field order is part of the wire format.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
	pub event: &'a str,
	pub timestamp: i64,
	pub data: &'a serde_json::Value,
}

impl<'a> WebhookPayload<'a> {
	pub fn new(event: &'a str, timestamp: i64, data: &'a serde_json::Value) -> Self {
		Self {
			event,
			timestamp,
			data,
		}
	}

	pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(self)
	}
}
