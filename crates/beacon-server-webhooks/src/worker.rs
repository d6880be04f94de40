// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_server_jobs::{Task, TaskHandler, TaskQueue};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::executor::DeliveryExecutor;
use crate::scheduler::RetryScheduler;
use crate::store::WebhookStore;
use crate::types::{DeliveryStatus, Outcome, DEFAULT_TIMEOUT};

/// Queue entry pointing at a stored delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTask {
	pub delivery_id: Uuid,
}

impl DeliveryTask {
	pub fn new(delivery_id: Uuid) -> Self {
		Self { delivery_id }
	}
}

impl Task for DeliveryTask {
	type Key = Uuid;

	fn key(&self) -> Uuid {
		self.delivery_id
	}
}

pub struct DeliveryWorker {
	store: Arc<dyn WebhookStore>,
	queue: Arc<dyn TaskQueue<DeliveryTask>>,
	executor: DeliveryExecutor,
	scheduler: RetryScheduler,
}

impl DeliveryWorker {
	pub fn new(
		store: Arc<dyn WebhookStore>,
		queue: Arc<dyn TaskQueue<DeliveryTask>>,
		executor: DeliveryExecutor,
		scheduler: RetryScheduler,
	) -> Self {
		Self {
			store,
			queue,
			executor,
			scheduler,
		}
	}

	/// Load the delivery and run one attempt if it is due.
	///
	/// Returns `None` when nothing was executed: the delivery is gone,
	/// terminal, not yet due (in which case it is put back on the queue), or
	/// held by a live attempt elsewhere.
	#[instrument(skip(self), fields(delivery_id = %delivery_id))]
	pub async fn process(&self, delivery_id: Uuid) -> Result<Option<Outcome>> {
		let Some(mut delivery) = self.store.get_delivery(delivery_id).await? else {
			warn!("Delivery not found, dropping task");
			return Ok(None);
		};

		if delivery.is_terminal() {
			debug!(status = %delivery.status, "Delivery already finished");
			return Ok(None);
		}

		if delivery.status == DeliveryStatus::Retrying {
			if let Some(at) = delivery.next_retry_at.filter(|at| *at > Utc::now()) {
				debug!(next_retry_at = %at, "Delivery not due yet, re-enqueueing");
				self.queue.enqueue(DeliveryTask::new(delivery_id), at).await?;
				return Ok(None);
			}
		}

		let subscription = self.store.get_subscription(delivery.subscription_id).await?;
		let timeout = subscription.as_ref().map_or(DEFAULT_TIMEOUT, |s| s.timeout);
		if delivery.is_held(timeout, Utc::now()) {
			debug!(attempt = delivery.attempt, "Delivery is held by a running attempt");
			return Ok(None);
		}

		let outcome = match self
			.executor
			.execute(&mut delivery, subscription.as_ref())
			.await
		{
			Ok(outcome) => outcome,
			Err(WebhookError::AlreadyClaimed(_)) => {
				debug!("Delivery claimed by another worker");
				return Ok(None);
			}
			Err(e) => return Err(e),
		};

		if outcome == Outcome::Retriable {
			if let Some(sub) = subscription.as_ref() {
				self.scheduler.schedule(&mut delivery, sub).await?;
			}
		}
		Ok(Some(outcome))
	}
}

#[async_trait]
impl TaskHandler<DeliveryTask> for DeliveryWorker {
	async fn handle(&self, task: DeliveryTask) {
		if let Err(e) = self.process(task.delivery_id).await {
			error!(delivery_id = %task.delivery_id, error = %e, "Webhook delivery task failed");
		}
	}
}

/// Re-enqueue every unfinished delivery. Safe to repeat, including from
/// several processes: keys already pending are skipped by the queue and each
/// attempt is claimed in the store before it is sent.
///
/// Retrying deliveries keep their `next_retry_at`; an `in_flight` delivery is
/// left alone until its lease runs out; everything else is due now.
#[instrument(skip_all)]
pub async fn recover(
	store: &dyn WebhookStore,
	queue: &dyn TaskQueue<DeliveryTask>,
) -> Result<usize> {
	let deliveries = store.list_unfinished_deliveries().await?;
	let now = Utc::now();
	let mut timeouts: HashMap<Uuid, Duration> = HashMap::new();
	let mut recovered = 0;
	let mut held = 0;

	for delivery in deliveries {
		if delivery.status == DeliveryStatus::InFlight {
			let timeout = match timeouts.get(&delivery.subscription_id).copied() {
				Some(timeout) => timeout,
				None => {
					let timeout = store
						.get_subscription(delivery.subscription_id)
						.await?
						.map_or(DEFAULT_TIMEOUT, |s| s.timeout);
					timeouts.insert(delivery.subscription_id, timeout);
					timeout
				}
			};
			if delivery.is_held(timeout, now) {
				held += 1;
				continue;
			}
		}

		let at = match (delivery.status, delivery.next_retry_at) {
			(DeliveryStatus::Retrying, Some(at)) => at,
			_ => now,
		};
		if queue.enqueue(DeliveryTask::new(delivery.id), at).await? {
			recovered += 1;
		}
	}

	if recovered > 0 {
		info!(recovered, held, "Recovered unfinished webhook deliveries");
	} else {
		debug!(held, "No unfinished webhook deliveries to recover");
	}
	Ok(recovered)
}
