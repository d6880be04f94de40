// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Instant;

use beacon_common_webhook::{
	signature_header, HEADER_DELIVERY_ID, HEADER_EVENT, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, WebhookError};
use crate::settings::DeliverySettings;
use crate::store::WebhookStore;
use crate::types::{
	lease_cutoff, Delivery, DeliveryStatus, Outcome, WebhookPayload, WebhookSubscription,
};
use crate::validation::validate_url;

/// Performs one signed HTTP attempt for a delivery and records the result.
pub struct DeliveryExecutor {
	store: Arc<dyn WebhookStore>,
	client: reqwest::Client,
	settings: DeliverySettings,
}

struct Response {
	status: Option<u16>,
	body: Option<String>,
	elapsed_ms: u64,
	error: Option<String>,
}

impl DeliveryExecutor {
	pub fn new(store: Arc<dyn WebhookStore>, settings: DeliverySettings) -> Self {
		Self {
			store,
			client: reqwest::Client::new(),
			settings,
		}
	}

	/// Run one attempt. `delivery` is updated in place and persisted before
	/// this returns.
	///
	/// A missing or inactive subscription, or one whose URL no longer
	/// validates, fails the delivery permanently without an HTTP call and
	/// without consuming an attempt.
	///
	/// Fails with [`WebhookError::AlreadyClaimed`] if the stored attempt has
	/// moved on or another worker holds it.
	#[instrument(
		skip_all,
		fields(delivery_id = %delivery.id, webhook_id = %delivery.subscription_id, event = %delivery.event)
	)]
	pub async fn execute(
		&self,
		delivery: &mut Delivery,
		subscription: Option<&WebhookSubscription>,
	) -> Result<Outcome> {
		if delivery.is_terminal() {
			return Err(WebhookError::TerminalDelivery {
				id: delivery.id,
				status: delivery.status,
			});
		}

		let sub = match subscription {
			Some(sub) if sub.is_active => sub,
			Some(_) => return self.short_circuit(delivery, "subscription is inactive").await,
			None => return self.short_circuit(delivery, "subscription not found").await,
		};
		if let Err(e) = validate_url(&sub.url) {
			return self.short_circuit(delivery, &e.to_string()).await;
		}

		let claimed_at = Utc::now();
		let stale_before = lease_cutoff(sub.timeout, claimed_at);
		if !self
			.store
			.claim_delivery(delivery.id, delivery.attempt, claimed_at, stale_before)
			.await?
		{
			return Err(WebhookError::AlreadyClaimed(delivery.id));
		}
		delivery.attempt += 1;
		delivery.status = DeliveryStatus::InFlight;
		delivery.next_retry_at = None;
		delivery.updated_at = claimed_at;

		let response = self.send(delivery, sub).await?;
		delivery.response_status = response.status;
		delivery.response_body = response.body;
		delivery.response_time_ms = Some(response.elapsed_ms);

		let now = Utc::now();
		if response.error.is_none() {
			delivery.status = DeliveryStatus::Success;
			delivery.error_message = None;
			delivery.touch();
			self.store.update_delivery(delivery).await?;
			self.store.record_subscription_success(sub.id, now).await?;

			info!(
				attempt = delivery.attempt,
				status = ?response.status,
				response_time_ms = response.elapsed_ms,
				"Webhook delivered"
			);
			return Ok(Outcome::Success);
		}

		let non_retriable = response
			.status
			.is_some_and(|status| self.settings.is_non_retriable(status));
		let exhausted = delivery.attempt >= sub.max_retries;
		let outcome = if non_retriable || exhausted {
			delivery.status = DeliveryStatus::PermanentlyFailed;
			Outcome::Permanent
		} else {
			Outcome::Retriable
		};
		delivery.error_message = response.error;
		delivery.touch();
		self.store.update_delivery(delivery).await?;

		warn!(
			attempt = delivery.attempt,
			max_retries = sub.max_retries,
			status = ?response.status,
			error = delivery.error_message.as_deref().unwrap_or_default(),
			outcome = ?outcome,
			"Webhook delivery failed"
		);

		let streak = self.store.record_subscription_failure(sub.id, now).await?;
		if let Some(threshold) = self.settings.auto_disable_after_failures {
			if streak >= threshold {
				let reason = format!("Automatically disabled after {streak} consecutive failures");
				if self.store.deactivate_subscription(sub.id, &reason, now).await? {
					warn!(consecutive_failures = streak, "Webhook subscription auto-disabled");
				}
			}
		}

		Ok(outcome)
	}

	async fn short_circuit(&self, delivery: &mut Delivery, reason: &str) -> Result<Outcome> {
		delivery.status = DeliveryStatus::PermanentlyFailed;
		delivery.error_message = Some(reason.to_string());
		delivery.next_retry_at = None;
		delivery.touch();
		self.store.update_delivery(delivery).await?;
		warn!(reason, "Webhook delivery failed without an attempt");
		Ok(Outcome::Permanent)
	}

	async fn send(&self, delivery: &Delivery, sub: &WebhookSubscription) -> Result<Response> {
		let timestamp = Utc::now().timestamp();
		let body = WebhookPayload::new(&delivery.event, timestamp, &delivery.payload).to_bytes()?;
		let signature = signature_header(sub.secret.as_bytes(), &body, timestamp);
		let headers = self.build_headers(delivery, sub, timestamp, &signature)?;

		debug!(attempt = delivery.attempt, url = %sub.url, "Sending webhook");
		let started = Instant::now();
		let result = self
			.client
			.post(&sub.url)
			.headers(headers)
			.body(body)
			.timeout(sub.timeout)
			.send()
			.await;

		let response = match result {
			Ok(response) => {
				let status = response.status();
				let body = read_capped(response, self.settings.max_response_body_bytes).await;
				Response {
					status: Some(status.as_u16()),
					body: Some(body),
					elapsed_ms: 0,
					error: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
				}
			}
			Err(e) => Response {
				status: None,
				body: None,
				elapsed_ms: 0,
				error: Some(if e.is_timeout() {
					format!("request timed out after {}s", sub.timeout.as_secs_f64())
				} else {
					e.to_string()
				}),
			},
		};

		Ok(Response {
			elapsed_ms: started.elapsed().as_millis() as u64,
			..response
		})
	}

	/// Custom headers first; engine headers replace any with the same name.
	fn build_headers(
		&self,
		delivery: &Delivery,
		sub: &WebhookSubscription,
		timestamp: i64,
		signature: &str,
	) -> Result<HeaderMap> {
		let mut headers = HeaderMap::new();
		for (name, value) in &sub.headers {
			match (
				HeaderName::from_bytes(name.as_bytes()),
				HeaderValue::from_str(value),
			) {
				(Ok(name), Ok(value)) => {
					headers.insert(name, value);
				}
				_ => warn!(header = %name, "Skipping invalid custom header"),
			}
		}

		headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		headers.insert(USER_AGENT, header_value(&self.settings.user_agent)?);
		headers.insert(header_name(HEADER_EVENT)?, header_value(&delivery.event)?);
		headers.insert(
			header_name(HEADER_TIMESTAMP)?,
			header_value(&timestamp.to_string())?,
		);
		headers.insert(header_name(HEADER_SIGNATURE)?, header_value(signature)?);
		headers.insert(
			header_name(HEADER_DELIVERY_ID)?,
			header_value(&delivery.id.to_string())?,
		);
		Ok(headers)
	}
}

fn header_name(name: &str) -> Result<HeaderName> {
	HeaderName::from_bytes(name.as_bytes())
		.map_err(|e| WebhookError::Internal(format!("invalid header name {name}: {e}")))
}

fn header_value(value: &str) -> Result<HeaderValue> {
	HeaderValue::from_str(value)
		.map_err(|e| WebhookError::Internal(format!("invalid header value: {e}")))
}

/// Read at most `max` bytes of the body; the rest is never buffered.
async fn read_capped(mut response: reqwest::Response, max: usize) -> String {
	let mut buf = Vec::new();
	while buf.len() < max {
		match response.chunk().await {
			Ok(Some(chunk)) => {
				let take = (max - buf.len()).min(chunk.len());
				buf.extend_from_slice(&chunk[..take]);
			}
			Ok(None) => break,
			Err(e) => {
				debug!(error = %e, "Stopped reading response body");
				break;
			}
		}
	}
	truncate_body(String::from_utf8_lossy(&buf).into_owned(), max)
}

/// Cut `body` to at most `max` bytes without splitting a character.
pub(crate) fn truncate_body(mut body: String, max: usize) -> String {
	if body.len() <= max {
		return body;
	}
	let mut end = max;
	while !body.is_char_boundary(end) {
		end -= 1;
	}
	body.truncate(end);
	body
}
