// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook delivery configuration section.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 1 minute, 5 minutes, 30 minutes, 2 hours, 12 hours.
pub const DEFAULT_RETRY_SCHEDULE_SECS: [u64; 5] = [60, 300, 1800, 7200, 43200];

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_WORKER_CONCURRENCY: usize = 16;
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 10_000;
const DEFAULT_AUTO_DISABLE_AFTER: u32 = 10;
const DEFAULT_SIGNATURE_TOLERANCE_SECS: u64 = 300;
const DEFAULT_RECOVERY_INTERVAL_SECS: u64 = 60;

fn default_user_agent() -> String {
	format!("Beacon-Webhook/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
	/// Fixed table of delays; the last entry repeats.
	#[default]
	Schedule,
	/// `base * factor^(attempt-1)` capped at `max_delay_secs`.
	Exponential,
}

impl std::str::FromStr for RetryStrategy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"schedule" => Ok(Self::Schedule),
			"exponential" => Ok(Self::Exponential),
			other => Err(ConfigError::invalid(
				"webhooks.retry.strategy",
				format!("unknown strategy '{other}'"),
			)),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetryConfigLayer {
	pub strategy: Option<RetryStrategy>,
	pub schedule_secs: Option<Vec<u64>>,
	pub base_delay_secs: Option<u64>,
	pub factor: Option<f64>,
	pub max_delay_secs: Option<u64>,
	pub jitter: Option<bool>,
}

impl RetryConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.strategy.is_some() {
			self.strategy = other.strategy;
		}
		if other.schedule_secs.is_some() {
			self.schedule_secs = other.schedule_secs;
		}
		if other.base_delay_secs.is_some() {
			self.base_delay_secs = other.base_delay_secs;
		}
		if other.factor.is_some() {
			self.factor = other.factor;
		}
		if other.max_delay_secs.is_some() {
			self.max_delay_secs = other.max_delay_secs;
		}
		if other.jitter.is_some() {
			self.jitter = other.jitter;
		}
	}

	pub fn finalize(self) -> RetryConfig {
		let defaults = RetryConfig::default();
		RetryConfig {
			strategy: self.strategy.unwrap_or(defaults.strategy),
			schedule_secs: self.schedule_secs.unwrap_or(defaults.schedule_secs),
			base_delay_secs: self.base_delay_secs.unwrap_or(defaults.base_delay_secs),
			factor: self.factor.unwrap_or(defaults.factor),
			max_delay_secs: self.max_delay_secs.unwrap_or(defaults.max_delay_secs),
			jitter: self.jitter.unwrap_or(defaults.jitter),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
	pub strategy: RetryStrategy,
	pub schedule_secs: Vec<u64>,
	pub base_delay_secs: u64,
	pub factor: f64,
	pub max_delay_secs: u64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			strategy: RetryStrategy::Schedule,
			schedule_secs: DEFAULT_RETRY_SCHEDULE_SECS.to_vec(),
			base_delay_secs: 60,
			factor: 5.0,
			max_delay_secs: 43200, // 12 hours
			jitter: false,
		}
	}
}

impl RetryConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		match self.strategy {
			RetryStrategy::Schedule => {
				if self.schedule_secs.is_empty() {
					return Err(ConfigError::Validation(
						"webhooks.retry.schedule_secs must not be empty".to_string(),
					));
				}
				if !self.schedule_secs.windows(2).all(|w| w[0] <= w[1]) {
					return Err(ConfigError::Validation(format!(
						"webhooks.retry.schedule_secs must not decrease, got {:?}",
						self.schedule_secs
					)));
				}
			}
			RetryStrategy::Exponential => {
				if self.base_delay_secs == 0 {
					return Err(ConfigError::Validation(
						"webhooks.retry.base_delay_secs must be greater than zero".to_string(),
					));
				}
				if self.factor.is_nan() || self.factor < 1.0 {
					return Err(ConfigError::Validation(
						"webhooks.retry.factor must be at least 1.0".to_string(),
					));
				}
				if self.max_delay_secs < self.base_delay_secs {
					return Err(ConfigError::Validation(
						"webhooks.retry.max_delay_secs must not be below base_delay_secs".to_string(),
					));
				}
			}
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebhooksConfigLayer {
	pub default_timeout_secs: Option<u64>,
	pub default_max_retries: Option<u32>,
	pub worker_concurrency: Option<usize>,
	pub max_response_body_bytes: Option<usize>,
	pub user_agent: Option<String>,
	pub auto_disable_after_failures: Option<u32>,
	pub non_retriable_statuses: Option<Vec<u16>>,
	pub signature_tolerance_secs: Option<u64>,
	pub extra_events: Option<Vec<String>>,
	pub recovery_interval_secs: Option<u64>,
	#[serde(default)]
	pub retry: Option<RetryConfigLayer>,
}

impl WebhooksConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.default_timeout_secs.is_some() {
			self.default_timeout_secs = other.default_timeout_secs;
		}
		if other.default_max_retries.is_some() {
			self.default_max_retries = other.default_max_retries;
		}
		if other.worker_concurrency.is_some() {
			self.worker_concurrency = other.worker_concurrency;
		}
		if other.max_response_body_bytes.is_some() {
			self.max_response_body_bytes = other.max_response_body_bytes;
		}
		if other.user_agent.is_some() {
			self.user_agent = other.user_agent;
		}
		if other.auto_disable_after_failures.is_some() {
			self.auto_disable_after_failures = other.auto_disable_after_failures;
		}
		if other.non_retriable_statuses.is_some() {
			self.non_retriable_statuses = other.non_retriable_statuses;
		}
		if other.signature_tolerance_secs.is_some() {
			self.signature_tolerance_secs = other.signature_tolerance_secs;
		}
		if other.extra_events.is_some() {
			self.extra_events = other.extra_events;
		}
		if other.recovery_interval_secs.is_some() {
			self.recovery_interval_secs = other.recovery_interval_secs;
		}
		match (self.retry.as_mut(), other.retry) {
			(Some(current), Some(next)) => current.merge(next),
			(None, Some(next)) => self.retry = Some(next),
			_ => {}
		}
	}

	pub fn finalize(self) -> Result<WebhooksConfig, ConfigError> {
		let config = WebhooksConfig {
			default_timeout_secs: self.default_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
			default_max_retries: self.default_max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
			worker_concurrency: self.worker_concurrency.unwrap_or(DEFAULT_WORKER_CONCURRENCY),
			max_response_body_bytes: self
				.max_response_body_bytes
				.unwrap_or(DEFAULT_MAX_RESPONSE_BODY_BYTES),
			user_agent: self.user_agent.unwrap_or_else(default_user_agent),
			auto_disable_after_failures: match self.auto_disable_after_failures {
				Some(0) => None,
				Some(n) => Some(n),
				None => Some(DEFAULT_AUTO_DISABLE_AFTER),
			},
			non_retriable_statuses: self.non_retriable_statuses.unwrap_or_default(),
			signature_tolerance_secs: self
				.signature_tolerance_secs
				.unwrap_or(DEFAULT_SIGNATURE_TOLERANCE_SECS),
			extra_events: self.extra_events.unwrap_or_default(),
			recovery_interval_secs: self
				.recovery_interval_secs
				.unwrap_or(DEFAULT_RECOVERY_INTERVAL_SECS),
			retry: self.retry.unwrap_or_default().finalize(),
		};
		config.validate()?;
		Ok(config)
	}
}

/// Webhook delivery configuration (runtime, fully resolved).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhooksConfig {
	/// Per-attempt timeout for subscriptions that do not set their own.
	pub default_timeout_secs: u64,
	pub default_max_retries: u32,
	pub worker_concurrency: usize,
	pub max_response_body_bytes: usize,
	pub user_agent: String,
	/// `None` turns auto-disable off. Set `0` in a config file to get `None`.
	pub auto_disable_after_failures: Option<u32>,
	/// Response codes that finalize a delivery without retrying.
	pub non_retriable_statuses: Vec<u16>,
	pub signature_tolerance_secs: u64,
	/// Event names accepted in addition to the built-in catalogue.
	pub extra_events: Vec<String>,
	/// How often `serve` re-scans the store for deliveries it has not queued.
	pub recovery_interval_secs: u64,
	pub retry: RetryConfig,
}

impl Default for WebhooksConfig {
	fn default() -> Self {
		Self {
			default_timeout_secs: DEFAULT_TIMEOUT_SECS,
			default_max_retries: DEFAULT_MAX_RETRIES,
			worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
			max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
			user_agent: default_user_agent(),
			auto_disable_after_failures: Some(DEFAULT_AUTO_DISABLE_AFTER),
			non_retriable_statuses: Vec::new(),
			signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
			extra_events: Vec::new(),
			recovery_interval_secs: DEFAULT_RECOVERY_INTERVAL_SECS,
			retry: RetryConfig::default(),
		}
	}
}

impl WebhooksConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.default_timeout_secs == 0 {
			return Err(ConfigError::Validation(
				"webhooks.default_timeout_secs must be greater than zero".to_string(),
			));
		}
		if self.default_max_retries == 0 {
			return Err(ConfigError::Validation(
				"webhooks.default_max_retries must be greater than zero".to_string(),
			));
		}
		if self.worker_concurrency == 0 {
			return Err(ConfigError::Validation(
				"webhooks.worker_concurrency must be greater than zero".to_string(),
			));
		}
		if self.recovery_interval_secs == 0 {
			return Err(ConfigError::Validation(
				"webhooks.recovery_interval_secs must be greater than zero".to_string(),
			));
		}
		if let Some(status) = self
			.non_retriable_statuses
			.iter()
			.find(|s| !(100..=599).contains(*s))
		{
			return Err(ConfigError::Validation(format!(
				"webhooks.non_retriable_statuses contains invalid status {status}"
			)));
		}
		self.retry.validate()
	}
}
