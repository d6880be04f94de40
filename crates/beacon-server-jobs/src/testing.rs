// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queue double for driving task sequences by hand in tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{JobError, Result};
use crate::task::{Task, TaskQueue};

/// Records enqueued tasks instead of running them.
///
/// Applies the same pending-key deduplication as [`crate::DelayQueue`].
pub struct RecordingQueue<T: Task> {
	entries: Mutex<Vec<(T, DateTime<Utc>)>>,
	pending: Mutex<HashSet<T::Key>>,
	closed: Mutex<bool>,
}

impl<T: Task> Default for RecordingQueue<T> {
	fn default() -> Self {
		Self {
			entries: Mutex::new(Vec::new()),
			pending: Mutex::new(HashSet::new()),
			closed: Mutex::new(false),
		}
	}
}

impl<T: Task> RecordingQueue<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make every later `enqueue` fail with [`JobError::QueueClosed`].
	pub fn close(&self) {
		*self.closed.lock().unwrap() = true;
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Everything enqueued so far, oldest first.
	pub fn entries(&self) -> Vec<(T, DateTime<Utc>)> {
		self.entries.lock().unwrap().clone()
	}

	/// Remove the oldest entry, as a worker picking it up would.
	pub fn pop(&self) -> Option<(T, DateTime<Utc>)> {
		let mut entries = self.entries.lock().unwrap();
		if entries.is_empty() {
			return None;
		}
		let (task, at) = entries.remove(0);
		self.pending.lock().unwrap().remove(&task.key());
		Some((task, at))
	}
}

#[async_trait]
impl<T: Task> TaskQueue<T> for RecordingQueue<T> {
	async fn enqueue(&self, task: T, not_before: DateTime<Utc>) -> Result<bool> {
		if *self.closed.lock().unwrap() {
			return Err(JobError::QueueClosed);
		}
		if !self.pending.lock().unwrap().insert(task.key()) {
			return Ok(false);
		}
		self.entries.lock().unwrap().push((task, not_before));
		Ok(true)
	}
}
