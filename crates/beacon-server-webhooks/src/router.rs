// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use beacon_common_webhook::SigningSecret;
use beacon_server_jobs::TaskQueue;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::events::{EventTaxonomy, TEST_EVENT};
use crate::matcher::matches;
use crate::store::WebhookStore;
use crate::types::{Delivery, DeliveryStatus, WebhookSubscription};
use crate::validation::validate_subscription;
use crate::worker::DeliveryTask;

/// Turns domain events into persisted, enqueued deliveries.
///
/// The router never talks to the network.
#[derive(Clone)]
pub struct DispatchRouter {
	store: Arc<dyn WebhookStore>,
	queue: Arc<dyn TaskQueue<DeliveryTask>>,
	taxonomy: Arc<EventTaxonomy>,
}

impl DispatchRouter {
	pub fn new(
		store: Arc<dyn WebhookStore>,
		queue: Arc<dyn TaskQueue<DeliveryTask>>,
		taxonomy: EventTaxonomy,
	) -> Self {
		Self {
			store,
			queue,
			taxonomy: Arc::new(taxonomy),
		}
	}

	/// Fan `event` out to every matching active subscription.
	///
	/// Returns the ids of the created deliveries; an empty list when nothing
	/// matched.
	#[instrument(skip(self, payload), fields(event = %event, tenant_id = ?tenant_id))]
	pub async fn dispatch(
		&self,
		event: &str,
		payload: serde_json::Value,
		tenant_id: Option<Uuid>,
	) -> Result<Vec<Uuid>> {
		if event.is_empty() {
			return Err(WebhookError::InvalidEventName(event.to_string()));
		}
		if !self.taxonomy.contains(event) {
			debug!("Dispatching event outside the known taxonomy");
		}

		let subscriptions = self.store.list_active_subscriptions(tenant_id).await?;
		let mut ids = Vec::new();
		for sub in subscriptions.iter().filter(|s| matches(s, event)) {
			ids.push(self.create_and_enqueue(sub.id, event, payload.clone()).await?);
		}

		info!(deliveries = ids.len(), "Event dispatched");
		Ok(ids)
	}

	/// Dispatch to one subscription regardless of its patterns.
	#[instrument(skip(self, subscription, payload), fields(webhook_id = %subscription.id, event = %event))]
	pub async fn dispatch_to(
		&self,
		subscription: &WebhookSubscription,
		event: &str,
		payload: serde_json::Value,
	) -> Result<Uuid> {
		if event.is_empty() {
			return Err(WebhookError::InvalidEventName(event.to_string()));
		}
		self.create_and_enqueue(subscription.id, event, payload).await
	}

	/// Send a `webhook.test` event so a tenant can check their endpoint.
	#[instrument(skip(self), fields(webhook_id = %subscription_id))]
	pub async fn send_test(&self, subscription_id: Uuid) -> Result<Uuid> {
		let sub = self
			.store
			.get_subscription(subscription_id)
			.await?
			.ok_or(WebhookError::SubscriptionNotFound(subscription_id))?;

		let payload = json!({
			"test": true,
			"message": "This is a test webhook delivery",
			"webhook_id": sub.id,
			"tenant_id": sub.tenant_id,
		});
		self.dispatch_to(&sub, TEST_EVENT, payload).await
	}

	/// Retry a permanently failed delivery as a new delivery.
	///
	/// The original record is left untouched.
	#[instrument(skip(self), fields(delivery_id = %delivery_id))]
	pub async fn replay(&self, delivery_id: Uuid) -> Result<Uuid> {
		let original = self
			.store
			.get_delivery(delivery_id)
			.await?
			.ok_or(WebhookError::DeliveryNotFound(delivery_id))?;

		if original.status != DeliveryStatus::PermanentlyFailed {
			return Err(WebhookError::NotReplayable {
				id: delivery_id,
				status: original.status,
			});
		}

		let id = self
			.create_and_enqueue(original.subscription_id, &original.event, original.payload)
			.await?;
		info!(replay_id = %id, "Delivery replayed");
		Ok(id)
	}

	pub async fn delivery_history(&self, subscription_id: Uuid, limit: u32) -> Result<Vec<Delivery>> {
		self.store
			.list_deliveries_for_subscription(subscription_id, limit)
			.await
	}

	/// Validate and store a new subscription.
	#[instrument(skip(self, subscription), fields(webhook_id = %subscription.id, tenant_id = %subscription.tenant_id))]
	pub async fn register_subscription(&self, subscription: &WebhookSubscription) -> Result<()> {
		validate_subscription(subscription, &self.taxonomy)?;
		self.store.create_subscription(subscription).await?;
		info!(url = %subscription.url, "Webhook subscription registered");
		Ok(())
	}

	/// Replace the signing secret and return the new one.
	#[instrument(skip(self), fields(webhook_id = %subscription_id))]
	pub async fn rotate_secret(&self, subscription_id: Uuid) -> Result<SigningSecret> {
		let secret = SigningSecret::generate();
		self.store
			.rotate_secret(subscription_id, &secret, Utc::now())
			.await?;
		info!("Webhook secret rotated");
		Ok(secret)
	}

	/// Turn a disabled subscription back on and reset its failure streak.
	///
	/// Returns false if it was already active.
	#[instrument(skip(self), fields(webhook_id = %subscription_id))]
	pub async fn enable_subscription(&self, subscription_id: Uuid) -> Result<bool> {
		let enabled = self
			.store
			.activate_subscription(subscription_id, Utc::now())
			.await?;
		if enabled {
			info!("Webhook subscription re-enabled");
		}
		Ok(enabled)
	}

	async fn create_and_enqueue(
		&self,
		subscription_id: Uuid,
		event: &str,
		payload: serde_json::Value,
	) -> Result<Uuid> {
		let delivery = Delivery::new(subscription_id, event, payload);
		self.store.create_delivery(&delivery).await?;

		if let Err(e) = self
			.queue
			.enqueue(DeliveryTask::new(delivery.id), delivery.created_at)
			.await
		{
			error!(
				delivery_id = %delivery.id,
				error = %e,
				"Failed to enqueue webhook delivery, recovery will pick it up"
			);
		}
		Ok(delivery.id)
	}
}

/// Fire-and-forget entry point for business code.
///
/// Errors are logged, never returned, so a webhook problem can neither fail
/// nor roll back the operation that produced the event.
#[derive(Clone)]
pub struct ProducerHandle {
	router: DispatchRouter,
}

impl ProducerHandle {
	pub fn new(router: DispatchRouter) -> Self {
		Self { router }
	}

	pub async fn notify(&self, event: &str, payload: serde_json::Value, tenant_id: Option<Uuid>) {
		if let Err(e) = self.router.dispatch(event, payload, tenant_id).await {
			error!(event, error = %e, "Failed to dispatch webhook event");
		}
	}
}
