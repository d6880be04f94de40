// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// A unit of deferred work.
///
/// Two tasks with the same key are never pending or running at the same time.
pub trait Task: Clone + Send + Sync + 'static {
	type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

	fn key(&self) -> Self::Key;
}

/// Accepts tasks to run at or after a given instant.
#[async_trait]
pub trait TaskQueue<T: Task>: Send + Sync {
	/// Returns `Ok(false)` when a task with the same key is already pending.
	async fn enqueue(&self, task: T, not_before: DateTime<Utc>) -> Result<bool>;
}

/// Executes due tasks. Failures are the handler's to log or reschedule.
#[async_trait]
pub trait TaskHandler<T: Task>: Send + Sync {
	async fn handle(&self, task: T);
}
