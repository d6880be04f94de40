// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{JobError, Result};
use crate::task::{Task, TaskQueue};

/// How long a task is held back when its key is still running.
pub(crate) const DEFER_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub pending: usize,
	pub running: usize,
	pub completed: u64,
	pub deferred: u64,
}

struct Inner<T: Task> {
	tx: mpsc::UnboundedSender<T>,
	pending: Mutex<HashSet<T::Key>>,
	running: Mutex<HashSet<T::Key>>,
	completed: AtomicU64,
	deferred: AtomicU64,
	shutdown: CancellationToken,
}

/// In-process timer queue.
///
/// Every enqueued task gets its own sleeping tokio task; nothing blocks a
/// worker while waiting. Due tasks are delivered through [`DueTasks`].
pub struct DelayQueue<T: Task> {
	inner: Arc<Inner<T>>,
}

impl<T: Task> Clone for DelayQueue<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

/// Receiving half of a [`DelayQueue`]. Consumed by [`crate::WorkerPool`].
pub struct DueTasks<T> {
	pub(crate) rx: mpsc::UnboundedReceiver<T>,
}

impl<T> DueTasks<T> {
	pub async fn recv(&mut self) -> Option<T> {
		self.rx.recv().await
	}
}

impl<T: Task> DelayQueue<T> {
	pub fn new() -> (Self, DueTasks<T>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let queue = Self {
			inner: Arc::new(Inner {
				tx,
				pending: Mutex::new(HashSet::new()),
				running: Mutex::new(HashSet::new()),
				completed: AtomicU64::new(0),
				deferred: AtomicU64::new(0),
				shutdown: CancellationToken::new(),
			}),
		};
		(queue, DueTasks { rx })
	}

	pub async fn stats(&self) -> QueueStats {
		QueueStats {
			pending: self.inner.pending.lock().await.len(),
			running: self.inner.running.lock().await.len(),
			completed: self.inner.completed.load(Ordering::Relaxed),
			deferred: self.inner.deferred.load(Ordering::Relaxed),
		}
	}

	/// Stop accepting tasks and cancel every timer still waiting.
	pub fn close(&self) {
		self.inner.shutdown.cancel();
	}

	pub fn is_closed(&self) -> bool {
		self.inner.shutdown.is_cancelled()
	}

	pub(crate) fn shutdown_token(&self) -> CancellationToken {
		self.inner.shutdown.clone()
	}

	pub(crate) async fn mark_dequeued(&self, key: &T::Key) {
		self.inner.pending.lock().await.remove(key);
	}

	/// Returns false if the key is already running.
	pub(crate) async fn start_running(&self, key: &T::Key) -> bool {
		self.inner.running.lock().await.insert(key.clone())
	}

	pub(crate) async fn finish_running(&self, key: &T::Key) {
		self.inner.running.lock().await.remove(key);
		self.inner.completed.fetch_add(1, Ordering::Relaxed);
	}

	/// Push a task whose key is busy back onto the timer.
	pub(crate) async fn defer(&self, task: T) {
		if !self.inner.pending.lock().await.insert(task.key()) {
			trace!(key = ?task.key(), "deferred task already pending, dropping duplicate");
			return;
		}
		self.inner.deferred.fetch_add(1, Ordering::Relaxed);
		self.schedule(task, DEFER_DELAY);
	}

	fn schedule(&self, task: T, delay: Duration) {
		if delay.is_zero() {
			self.send_due(task);
			return;
		}

		let queue = self.clone();
		let shutdown = self.inner.shutdown.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(delay) => queue.send_due(task),
				_ = shutdown.cancelled() => {
					trace!(key = ?task.key(), "timer cancelled by shutdown");
				}
			}
		});
	}

	fn send_due(&self, task: T) {
		if let Err(mpsc::error::SendError(task)) = self.inner.tx.send(task) {
			warn!(key = ?task.key(), "due task dropped, queue receiver is gone");
		}
	}
}

#[async_trait]
impl<T: Task> TaskQueue<T> for DelayQueue<T> {
	async fn enqueue(&self, task: T, not_before: DateTime<Utc>) -> Result<bool> {
		if self.is_closed() {
			return Err(JobError::QueueClosed);
		}

		let key = task.key();
		if !self.inner.pending.lock().await.insert(key.clone()) {
			debug!(key = ?key, "task already pending");
			return Ok(false);
		}

		let delay = (not_before - Utc::now()).to_std().unwrap_or(Duration::ZERO);
		trace!(key = ?key, delay_ms = delay.as_millis() as u64, "task enqueued");
		self.schedule(task, delay);
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq)]
	struct Ping(u32);

	impl Task for Ping {
		type Key = u32;

		fn key(&self) -> u32 {
			self.0
		}
	}

	#[tokio::test]
	async fn test_due_task_is_delivered_immediately() {
		let (queue, mut due) = DelayQueue::new();
		assert!(queue.enqueue(Ping(1), Utc::now()).await.unwrap());
		assert_eq!(due.recv().await, Some(Ping(1)));
	}

	#[tokio::test]
	async fn test_duplicate_pending_key_is_rejected() {
		let (queue, _due) = DelayQueue::new();
		let later = Utc::now() + chrono::Duration::seconds(60);
		assert!(queue.enqueue(Ping(7), later).await.unwrap());
		assert!(!queue.enqueue(Ping(7), later).await.unwrap());
		assert_eq!(queue.stats().await.pending, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_future_task_waits_for_not_before() {
		let (queue, mut due) = DelayQueue::new();
		queue
			.enqueue(Ping(2), Utc::now() + chrono::Duration::seconds(30))
			.await
			.unwrap();

		tokio::task::yield_now().await;
		assert!(due.rx.try_recv().is_err());

		tokio::time::advance(Duration::from_secs(31)).await;
		assert_eq!(due.recv().await, Some(Ping(2)));
	}

	#[tokio::test]
	async fn test_enqueue_after_close_fails() {
		let (queue, _due) = DelayQueue::<Ping>::new();
		queue.close();
		let result = queue.enqueue(Ping(3), Utc::now()).await;
		assert!(matches!(result, Err(JobError::QueueClosed)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_close_cancels_pending_timers() {
		let (queue, mut due) = DelayQueue::new();
		queue
			.enqueue(Ping(4), Utc::now() + chrono::Duration::seconds(5))
			.await
			.unwrap();
		queue.close();

		tokio::time::advance(Duration::from_secs(10)).await;
		tokio::task::yield_now().await;
		assert!(due.rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_running_key_bookkeeping() {
		let (queue, _due) = DelayQueue::<Ping>::new();
		assert!(queue.start_running(&5).await);
		assert!(!queue.start_running(&5).await);
		queue.finish_running(&5).await;
		assert!(queue.start_running(&5).await);

		let stats = queue.stats().await;
		assert_eq!(stats.running, 1);
		assert_eq!(stats.completed, 1);
	}
}
