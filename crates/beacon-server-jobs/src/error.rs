// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Task queue is closed")]
	QueueClosed,
}

pub type Result<T> = std::result::Result<T, JobError>;
