// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use beacon_server_jobs::TaskQueue;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::error::{Result, WebhookError};
use crate::retry::RetryPolicy;
use crate::store::WebhookStore;
use crate::types::{Delivery, DeliveryStatus, WebhookSubscription};
use crate::worker::DeliveryTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
	Scheduled { at: DateTime<Utc> },
	Exhausted,
}

/// Decides whether a retriable failure gets another attempt, and when.
pub struct RetryScheduler {
	store: Arc<dyn WebhookStore>,
	queue: Arc<dyn TaskQueue<DeliveryTask>>,
	policy: RetryPolicy,
}

impl RetryScheduler {
	pub fn new(
		store: Arc<dyn WebhookStore>,
		queue: Arc<dyn TaskQueue<DeliveryTask>>,
		policy: RetryPolicy,
	) -> Self {
		Self {
			store,
			queue,
			policy,
		}
	}

	/// Persist the retry (or final failure), then enqueue it.
	///
	/// An enqueue failure is logged and not returned: the record is already
	/// durable and startup recovery picks it up.
	#[instrument(
		skip_all,
		fields(delivery_id = %delivery.id, webhook_id = %delivery.subscription_id, attempt = delivery.attempt)
	)]
	pub async fn schedule(
		&self,
		delivery: &mut Delivery,
		subscription: &WebhookSubscription,
	) -> Result<RetryDecision> {
		if delivery.is_terminal() {
			return Err(WebhookError::TerminalDelivery {
				id: delivery.id,
				status: delivery.status,
			});
		}

		if delivery.attempt >= subscription.max_retries {
			delivery.status = DeliveryStatus::PermanentlyFailed;
			delivery.next_retry_at = None;
			delivery.touch();
			self.store.update_delivery(delivery).await?;
			warn!(
				max_retries = subscription.max_retries,
				error = delivery.error_message.as_deref().unwrap_or_default(),
				"Webhook retries exhausted"
			);
			return Ok(RetryDecision::Exhausted);
		}

		let delay = self.policy.delay_for(delivery.attempt);
		let delay = chrono::Duration::from_std(delay)
			.map_err(|e| WebhookError::Internal(format!("retry delay out of range: {e}")))?;
		let at = Utc::now() + delay;

		delivery.status = DeliveryStatus::Retrying;
		delivery.next_retry_at = Some(at);
		delivery.touch();
		self.store.update_delivery(delivery).await?;

		if let Err(e) = self
			.queue
			.enqueue(DeliveryTask::new(delivery.id), at)
			.await
		{
			error!(error = %e, "Failed to enqueue webhook retry, recovery will pick it up");
		}

		info!(
			next_retry_secs = delay.num_seconds(),
			next_retry_at = %at,
			"Webhook retry scheduled"
		);
		Ok(RetryDecision::Scheduled { at })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::InMemoryWebhookStore;
	use beacon_server_jobs::testing::RecordingQueue;
	use serde_json::json;
	use std::time::Duration;
	use uuid::Uuid;

	async fn setup(
		max_retries: u32,
	) -> (
		Arc<InMemoryWebhookStore>,
		Arc<RecordingQueue<DeliveryTask>>,
		RetryScheduler,
		WebhookSubscription,
		Delivery,
	) {
		let store = Arc::new(InMemoryWebhookStore::new());
		let queue = Arc::new(RecordingQueue::<DeliveryTask>::new());
		let sub = WebhookSubscription::new(
			Uuid::new_v4(),
			"ops",
			"https://example.com/hook",
			vec!["*".to_string()],
		)
		.with_max_retries(max_retries);
		store.create_subscription(&sub).await.unwrap();
		let delivery = Delivery::new(sub.id, "report.generated", json!({}));
		store.create_delivery(&delivery).await.unwrap();
		let scheduler = RetryScheduler::new(store.clone(), queue.clone(), RetryPolicy::default());
		(store, queue, scheduler, sub, delivery)
	}

	#[tokio::test]
	async fn test_schedules_with_policy_delay() {
		let (store, queue, scheduler, sub, mut delivery) = setup(5).await;
		delivery.attempt = 2;
		delivery.status = DeliveryStatus::InFlight;

		let before = Utc::now();
		let decision = scheduler.schedule(&mut delivery, &sub).await.unwrap();
		let RetryDecision::Scheduled { at } = decision else {
			panic!("expected a scheduled retry, got {decision:?}");
		};
		assert!(at >= before + chrono::Duration::seconds(300));
		assert!(at <= Utc::now() + chrono::Duration::seconds(300));

		let stored = store.get_delivery(delivery.id).await.unwrap().unwrap();
		assert_eq!(stored.status, DeliveryStatus::Retrying);
		assert_eq!(stored.next_retry_at, Some(at));

		let entries = queue.entries();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].0.delivery_id, delivery.id);
		assert_eq!(entries[0].1, at);
	}

	#[tokio::test]
	async fn test_exhausted_at_max_retries() {
		let (store, queue, scheduler, sub, mut delivery) = setup(3).await;
		delivery.attempt = 3;
		delivery.error_message = Some("HTTP 503".to_string());

		let decision = scheduler.schedule(&mut delivery, &sub).await.unwrap();
		assert_eq!(decision, RetryDecision::Exhausted);
		assert!(queue.is_empty());

		let stored = store.get_delivery(delivery.id).await.unwrap().unwrap();
		assert_eq!(stored.status, DeliveryStatus::PermanentlyFailed);
		assert_eq!(stored.error_message.as_deref(), Some("HTTP 503"));
		assert!(stored.next_retry_at.is_none());
	}

	#[tokio::test]
	async fn test_enqueue_failure_still_persists() {
		let (store, queue, scheduler, sub, mut delivery) = setup(5).await;
		queue.close();
		delivery.attempt = 1;

		let decision = scheduler.schedule(&mut delivery, &sub).await.unwrap();
		assert!(matches!(decision, RetryDecision::Scheduled { .. }));
		let stored = store.get_delivery(delivery.id).await.unwrap().unwrap();
		assert_eq!(stored.status, DeliveryStatus::Retrying);
	}

	#[tokio::test]
	async fn test_floor_applies_to_zero_schedule() {
		let (store, _queue, _, sub, mut delivery) = setup(5).await;
		let scheduler = RetryScheduler::new(
			store,
			Arc::new(RecordingQueue::<DeliveryTask>::new()),
			RetryPolicy::Schedule(vec![Duration::ZERO]),
		);
		delivery.attempt = 1;

		let before = Utc::now();
		let RetryDecision::Scheduled { at } = scheduler.schedule(&mut delivery, &sub).await.unwrap()
		else {
			panic!("expected a scheduled retry");
		};
		assert!(at >= before + chrono::Duration::seconds(1));
	}

	#[tokio::test]
	async fn test_terminal_delivery_is_never_rescheduled() {
		let (_store, queue, scheduler, sub, mut delivery) = setup(5).await;
		delivery.status = DeliveryStatus::Success;
		assert!(scheduler.schedule(&mut delivery, &sub).await.is_err());
		assert!(queue.is_empty());
	}
}
