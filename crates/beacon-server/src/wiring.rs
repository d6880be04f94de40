// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Maps resolved configuration onto engine settings.

use std::time::Duration;

use beacon_server_config::{RetryConfig, RetryStrategy, WebhooksConfig};
use beacon_server_webhooks::{DeliverySettings, EngineOptions, EventTaxonomy, RetryPolicy};

pub fn delivery_settings(config: &WebhooksConfig) -> DeliverySettings {
	DeliverySettings {
		user_agent: config.user_agent.clone(),
		max_response_body_bytes: config.max_response_body_bytes,
		non_retriable_statuses: config.non_retriable_statuses.clone(),
		auto_disable_after_failures: config.auto_disable_after_failures,
	}
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
	match config.strategy {
		RetryStrategy::Schedule => RetryPolicy::Schedule(
			config
				.schedule_secs
				.iter()
				.copied()
				.map(Duration::from_secs)
				.collect(),
		),
		RetryStrategy::Exponential => RetryPolicy::Exponential {
			base: Duration::from_secs(config.base_delay_secs),
			factor: config.factor,
			max: Duration::from_secs(config.max_delay_secs),
			jitter: config.jitter,
		},
	}
}

pub fn taxonomy(config: &WebhooksConfig) -> EventTaxonomy {
	EventTaxonomy::default().with_events(config.extra_events.iter().cloned())
}

pub fn engine_options(config: &WebhooksConfig) -> EngineOptions {
	EngineOptions {
		settings: delivery_settings(config),
		policy: retry_policy(&config.retry),
		taxonomy: taxonomy(config),
		concurrency: config.worker_concurrency,
	}
}
