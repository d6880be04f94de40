// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 10_000;
pub const DEFAULT_AUTO_DISABLE_AFTER: u32 = 10;

/// Knobs the executor reads on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
	pub user_agent: String,
	pub max_response_body_bytes: usize,
	/// Statuses that fail a delivery without retry.
	pub non_retriable_statuses: Vec<u16>,
	/// `None` turns auto-disable off.
	pub auto_disable_after_failures: Option<u32>,
}

impl Default for DeliverySettings {
	fn default() -> Self {
		Self {
			user_agent: concat!("Beacon-Webhook/", env!("CARGO_PKG_VERSION")).to_string(),
			max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
			non_retriable_statuses: Vec::new(),
			auto_disable_after_failures: Some(DEFAULT_AUTO_DISABLE_AFTER),
		}
	}
}

impl DeliverySettings {
	pub fn is_non_retriable(&self, status: u16) -> bool {
		self.non_retriable_statuses.contains(&status)
	}
}
