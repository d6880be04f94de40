// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use beacon_common_webhook::SigningSecret;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::types::{Delivery, DeliveryStatus, WebhookSubscription};

/// Persistence boundary for subscriptions and deliveries.
///
/// `update_delivery` is guarded: it fails with
/// [`WebhookError::TerminalDelivery`] when the stored record is terminal and
/// with [`WebhookError::AttemptRegression`] when the write would lower
/// `attempt`.
#[async_trait]
pub trait WebhookStore: Send + Sync {
	async fn create_subscription(&self, subscription: &WebhookSubscription) -> Result<()>;

	async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>>;

	/// Active subscriptions, optionally limited to one tenant.
	async fn list_active_subscriptions(
		&self,
		tenant_id: Option<Uuid>,
	) -> Result<Vec<WebhookSubscription>>;

	async fn record_subscription_success(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

	/// Returns the new consecutive failure count.
	async fn record_subscription_failure(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32>;

	/// Returns false if the subscription was already inactive.
	async fn deactivate_subscription(
		&self,
		id: Uuid,
		reason: &str,
		at: DateTime<Utc>,
	) -> Result<bool>;

	/// Re-enable a subscription and reset its failure streak. Returns false
	/// if it was already active.
	async fn activate_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

	async fn rotate_secret(
		&self,
		id: Uuid,
		secret: &SigningSecret,
		at: DateTime<Utc>,
	) -> Result<()>;

	async fn create_delivery(&self, delivery: &Delivery) -> Result<()>;

	async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>>;

	/// Atomically move a delivery still at `expected_attempt` to `in_flight`
	/// with the attempt bumped. `pending` and `retrying` rows can be claimed,
	/// and `in_flight` rows last touched before `stale_before`. Returns false
	/// when someone else holds or has moved the delivery.
	async fn claim_delivery(
		&self,
		id: Uuid,
		expected_attempt: u32,
		now: DateTime<Utc>,
		stale_before: DateTime<Utc>,
	) -> Result<bool>;

	async fn update_delivery(&self, delivery: &Delivery) -> Result<()>;

	/// Deliveries in `pending`, `in_flight` or `retrying`, oldest first.
	async fn list_unfinished_deliveries(&self) -> Result<Vec<Delivery>>;

	/// Newest first.
	async fn list_deliveries_for_subscription(
		&self,
		subscription_id: Uuid,
		limit: u32,
	) -> Result<Vec<Delivery>>;
}

#[derive(Default)]
struct State {
	subscriptions: HashMap<Uuid, WebhookSubscription>,
	deliveries: HashMap<Uuid, Delivery>,
	delivery_order: Vec<Uuid>,
}

/// Store backed by process memory. Used in tests and when embedding the engine.
#[derive(Default)]
pub struct InMemoryWebhookStore {
	state: Mutex<State>,
}

impl InMemoryWebhookStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
	async fn create_subscription(&self, subscription: &WebhookSubscription) -> Result<()> {
		let mut state = self.state.lock().await;
		if state.subscriptions.contains_key(&subscription.id) {
			return Err(WebhookError::Internal(format!(
				"subscription {} already exists",
				subscription.id
			)));
		}
		state
			.subscriptions
			.insert(subscription.id, subscription.clone());
		Ok(())
	}

	async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>> {
		Ok(self.state.lock().await.subscriptions.get(&id).cloned())
	}

	async fn list_active_subscriptions(
		&self,
		tenant_id: Option<Uuid>,
	) -> Result<Vec<WebhookSubscription>> {
		let state = self.state.lock().await;
		let mut subs: Vec<_> = state
			.subscriptions
			.values()
			.filter(|s| s.is_active)
			.filter(|s| tenant_id.map_or(true, |t| s.tenant_id == t))
			.cloned()
			.collect();
		subs.sort_by_key(|s| s.created_at);
		Ok(subs)
	}

	async fn record_subscription_success(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
		let mut state = self.state.lock().await;
		let sub = state
			.subscriptions
			.get_mut(&id)
			.ok_or(WebhookError::SubscriptionNotFound(id))?;
		sub.success_count += 1;
		sub.consecutive_failures = 0;
		sub.last_success_at = Some(at);
		sub.updated_at = at;
		Ok(())
	}

	async fn record_subscription_failure(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32> {
		let mut state = self.state.lock().await;
		let sub = state
			.subscriptions
			.get_mut(&id)
			.ok_or(WebhookError::SubscriptionNotFound(id))?;
		sub.failure_count += 1;
		sub.consecutive_failures += 1;
		sub.last_failure_at = Some(at);
		sub.updated_at = at;
		Ok(sub.consecutive_failures)
	}

	async fn deactivate_subscription(
		&self,
		id: Uuid,
		reason: &str,
		at: DateTime<Utc>,
	) -> Result<bool> {
		let mut state = self.state.lock().await;
		let sub = state
			.subscriptions
			.get_mut(&id)
			.ok_or(WebhookError::SubscriptionNotFound(id))?;
		if !sub.is_active {
			return Ok(false);
		}
		sub.is_active = false;
		sub.disabled_at = Some(at);
		sub.disabled_reason = Some(reason.to_string());
		sub.updated_at = at;
		Ok(true)
	}

	async fn activate_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
		let mut state = self.state.lock().await;
		let sub = state
			.subscriptions
			.get_mut(&id)
			.ok_or(WebhookError::SubscriptionNotFound(id))?;
		if sub.is_active {
			return Ok(false);
		}
		sub.is_active = true;
		sub.disabled_at = None;
		sub.disabled_reason = None;
		sub.consecutive_failures = 0;
		sub.updated_at = at;
		Ok(true)
	}

	async fn rotate_secret(
		&self,
		id: Uuid,
		secret: &SigningSecret,
		at: DateTime<Utc>,
	) -> Result<()> {
		let mut state = self.state.lock().await;
		let sub = state
			.subscriptions
			.get_mut(&id)
			.ok_or(WebhookError::SubscriptionNotFound(id))?;
		sub.secret = secret.clone();
		sub.updated_at = at;
		Ok(())
	}

	async fn create_delivery(&self, delivery: &Delivery) -> Result<()> {
		let mut state = self.state.lock().await;
		if !state.subscriptions.contains_key(&delivery.subscription_id) {
			return Err(WebhookError::SubscriptionNotFound(delivery.subscription_id));
		}
		if state.deliveries.contains_key(&delivery.id) {
			return Err(WebhookError::Internal(format!(
				"delivery {} already exists",
				delivery.id
			)));
		}
		state.delivery_order.push(delivery.id);
		state.deliveries.insert(delivery.id, delivery.clone());
		Ok(())
	}

	async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>> {
		Ok(self.state.lock().await.deliveries.get(&id).cloned())
	}

	async fn claim_delivery(
		&self,
		id: Uuid,
		expected_attempt: u32,
		now: DateTime<Utc>,
		stale_before: DateTime<Utc>,
	) -> Result<bool> {
		let mut state = self.state.lock().await;
		let Some(stored) = state.deliveries.get_mut(&id) else {
			return Ok(false);
		};
		let claimable = match stored.status {
			DeliveryStatus::Pending | DeliveryStatus::Retrying => true,
			DeliveryStatus::InFlight => stored.updated_at < stale_before,
			DeliveryStatus::Success | DeliveryStatus::PermanentlyFailed => false,
		};
		if !claimable || stored.attempt != expected_attempt {
			return Ok(false);
		}
		stored.status = DeliveryStatus::InFlight;
		stored.attempt += 1;
		stored.next_retry_at = None;
		stored.updated_at = now;
		Ok(true)
	}

	async fn update_delivery(&self, delivery: &Delivery) -> Result<()> {
		let mut state = self.state.lock().await;
		let stored = state
			.deliveries
			.get_mut(&delivery.id)
			.ok_or(WebhookError::DeliveryNotFound(delivery.id))?;
		if stored.is_terminal() {
			return Err(WebhookError::TerminalDelivery {
				id: delivery.id,
				status: stored.status,
			});
		}
		if delivery.attempt < stored.attempt {
			return Err(WebhookError::AttemptRegression {
				id: delivery.id,
				stored: stored.attempt,
				attempted: delivery.attempt,
			});
		}
		*stored = delivery.clone();
		Ok(())
	}

	async fn list_unfinished_deliveries(&self) -> Result<Vec<Delivery>> {
		let state = self.state.lock().await;
		Ok(state
			.delivery_order
			.iter()
			.filter_map(|id| state.deliveries.get(id))
			.filter(|d| !d.is_terminal())
			.cloned()
			.collect())
	}

	async fn list_deliveries_for_subscription(
		&self,
		subscription_id: Uuid,
		limit: u32,
	) -> Result<Vec<Delivery>> {
		let state = self.state.lock().await;
		Ok(state
			.delivery_order
			.iter()
			.rev()
			.filter_map(|id| state.deliveries.get(id))
			.filter(|d| d.subscription_id == subscription_id)
			.take(limit as usize)
			.cloned()
			.collect())
	}
}
