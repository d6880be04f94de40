// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::queue::{DelayQueue, DueTasks};
use crate::task::{Task, TaskHandler};

/// Runs due tasks from a [`DelayQueue`] with bounded concurrency.
pub struct WorkerPool {
	concurrency: usize,
	semaphore: Arc<Semaphore>,
	shutdown: CancellationToken,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
	pub fn start<T, H>(
		queue: DelayQueue<T>,
		due: DueTasks<T>,
		handler: Arc<H>,
		concurrency: usize,
	) -> Self
	where
		T: Task,
		H: TaskHandler<T> + 'static,
	{
		let concurrency = concurrency.max(1);
		let semaphore = Arc::new(Semaphore::new(concurrency));
		let shutdown = queue.shutdown_token();

		let dispatcher = tokio::spawn(dispatch_loop(
			queue,
			due,
			handler,
			Arc::clone(&semaphore),
			shutdown.clone(),
		));

		info!(concurrency, "Worker pool started");
		Self {
			concurrency,
			semaphore,
			shutdown,
			dispatcher: Mutex::new(Some(dispatcher)),
		}
	}

	/// Close the queue, stop taking new tasks and wait for running handlers.
	///
	/// Tasks still waiting on a timer are dropped; callers recover them from
	/// durable storage on the next start.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();

		if let Some(handle) = self.dispatcher.lock().await.take() {
			let _ = handle.await;
		}

		// Every running handler holds a permit until it finishes.
		let _ = self.semaphore.acquire_many(self.concurrency as u32).await;

		info!("Worker pool shut down");
	}
}

async fn dispatch_loop<T, H>(
	queue: DelayQueue<T>,
	mut due: DueTasks<T>,
	handler: Arc<H>,
	semaphore: Arc<Semaphore>,
	shutdown: CancellationToken,
) where
	T: Task,
	H: TaskHandler<T> + 'static,
{
	loop {
		let task = tokio::select! {
			biased;
			_ = shutdown.cancelled() => break,
			task = due.recv() => match task {
				Some(task) => task,
				None => break,
			},
		};

		let key = task.key();
		queue.mark_dequeued(&key).await;

		if !queue.start_running(&key).await {
			debug!(key = ?key, "task already running, deferring");
			queue.defer(task).await;
			continue;
		}

		let permit = tokio::select! {
			biased;
			_ = shutdown.cancelled() => {
				queue.finish_running(&key).await;
				break;
			}
			permit = Arc::clone(&semaphore).acquire_owned() => match permit {
				Ok(permit) => permit,
				Err(_) => break,
			},
		};

		let handler = Arc::clone(&handler);
		let queue = queue.clone();
		tokio::spawn(async move {
			if AssertUnwindSafe(handler.handle(task))
				.catch_unwind()
				.await
				.is_err()
			{
				error!(key = ?key, "task handler panicked");
			}
			queue.finish_running(&key).await;
			drop(permit);
		});
	}

	debug!("dispatch loop stopped");
}
