// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delayed task execution for the Beacon server.
//!
//! Producers call [`TaskQueue::enqueue`] with a `not_before` instant. The
//! [`DelayQueue`] holds each task on a timer until it is due, then hands it to
//! the [`WorkerPool`], which runs a bounded number of [`TaskHandler`]s at once.
//! Each task key is pending at most once and running at most once.

pub mod error;
pub mod pool;
pub mod queue;
pub mod task;
pub mod testing;

pub use error::{JobError, Result};
pub use pool::WorkerPool;
pub use queue::{DelayQueue, DueTasks, QueueStats};
pub use task::{Task, TaskHandler, TaskQueue};
