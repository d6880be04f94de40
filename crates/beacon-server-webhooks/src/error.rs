// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use uuid::Uuid;

use crate::types::DeliveryStatus;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
	#[error("database error: {0}")]
	Database(#[from] beacon_server_db::DbError),

	#[error("queue error: {0}")]
	Queue(#[from] beacon_server_jobs::JobError),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("subscription not found: {0}")]
	SubscriptionNotFound(Uuid),

	#[error("delivery not found: {0}")]
	DeliveryNotFound(Uuid),

	#[error("delivery {id} is already {status}")]
	TerminalDelivery { id: Uuid, status: DeliveryStatus },

	#[error("delivery {id} attempt would go from {stored} back to {attempted}")]
	AttemptRegression { id: Uuid, stored: u32, attempted: u32 },

	#[error("delivery {0} was claimed by another worker")]
	AlreadyClaimed(Uuid),

	#[error("invalid webhook url: {0}")]
	InvalidUrl(String),

	#[error("invalid event pattern: {0}")]
	InvalidEventPattern(String),

	#[error("unknown event: {0}")]
	UnknownEvent(String),

	#[error("invalid event name: {0:?}")]
	InvalidEventName(String),

	#[error("delivery {id} is {status} and cannot be replayed")]
	NotReplayable { id: Uuid, status: DeliveryStatus },

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
