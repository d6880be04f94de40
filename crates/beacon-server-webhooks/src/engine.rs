// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use beacon_server_jobs::{DelayQueue, QueueStats, TaskQueue, WorkerPool};
use tracing::{info, instrument};

use crate::error::Result;
use crate::events::EventTaxonomy;
use crate::executor::DeliveryExecutor;
use crate::retry::RetryPolicy;
use crate::router::{DispatchRouter, ProducerHandle};
use crate::scheduler::RetryScheduler;
use crate::settings::DeliverySettings;
use crate::store::WebhookStore;
use crate::worker::{recover, DeliveryTask, DeliveryWorker};

/// Options for [`WebhookEngine::start`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
	pub settings: DeliverySettings,
	pub policy: RetryPolicy,
	pub taxonomy: EventTaxonomy,
	pub concurrency: usize,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			settings: DeliverySettings::default(),
			policy: RetryPolicy::default(),
			taxonomy: EventTaxonomy::default(),
			concurrency: 16,
		}
	}
}

/// Running delivery engine: a delay queue, a worker pool and a router over
/// one store.
pub struct WebhookEngine {
	store: Arc<dyn WebhookStore>,
	queue: DelayQueue<DeliveryTask>,
	pool: WorkerPool,
	router: DispatchRouter,
}

impl WebhookEngine {
	pub fn start(store: Arc<dyn WebhookStore>, options: EngineOptions) -> Self {
		let (queue, due) = DelayQueue::new();
		let queue_handle: Arc<dyn TaskQueue<DeliveryTask>> = Arc::new(queue.clone());

		let executor = DeliveryExecutor::new(Arc::clone(&store), options.settings);
		let scheduler =
			RetryScheduler::new(Arc::clone(&store), Arc::clone(&queue_handle), options.policy);
		let worker = DeliveryWorker::new(
			Arc::clone(&store),
			Arc::clone(&queue_handle),
			executor,
			scheduler,
		);
		let pool = WorkerPool::start(queue.clone(), due, Arc::new(worker), options.concurrency);
		let router = DispatchRouter::new(Arc::clone(&store), queue_handle, options.taxonomy);

		info!(concurrency = options.concurrency, "Webhook engine started");
		Self {
			store,
			queue,
			pool,
			router,
		}
	}

	pub fn router(&self) -> &DispatchRouter {
		&self.router
	}

	pub fn producer(&self) -> ProducerHandle {
		ProducerHandle::new(self.router.clone())
	}

	/// Re-enqueue deliveries left unfinished by a previous run.
	pub async fn recover(&self) -> Result<usize> {
		recover(self.store.as_ref(), &self.queue).await
	}

	pub async fn stats(&self) -> QueueStats {
		self.queue.stats().await
	}

	/// Stop intake and wait for running attempts to finish.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.pool.shutdown().await;
		info!("Webhook engine stopped");
	}
}
