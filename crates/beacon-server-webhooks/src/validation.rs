// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use url::Url;

use crate::error::{Result, WebhookError};
use crate::events::{EventPattern, EventTaxonomy};
use crate::types::WebhookSubscription;

/// Accepts absolute `http`/`https` URLs with a host.
pub fn validate_url(raw: &str) -> Result<Url> {
	let url = Url::parse(raw).map_err(|e| WebhookError::InvalidUrl(format!("{raw}: {e}")))?;
	match url.scheme() {
		"http" | "https" => {}
		other => {
			return Err(WebhookError::InvalidUrl(format!(
				"{raw}: unsupported scheme {other}"
			)))
		}
	}
	if url.host_str().map_or(true, str::is_empty) {
		return Err(WebhookError::InvalidUrl(format!("{raw}: missing host")));
	}
	Ok(url)
}

/// Every pattern must parse; exact names and categories must be known.
pub fn validate_event_patterns(patterns: &[String], taxonomy: &EventTaxonomy) -> Result<()> {
	if patterns.is_empty() {
		return Err(WebhookError::InvalidEventPattern(
			"at least one event pattern is required".to_string(),
		));
	}
	let categories = taxonomy.categories();
	for raw in patterns {
		match EventPattern::parse(raw) {
			None => return Err(WebhookError::InvalidEventPattern(raw.clone())),
			Some(EventPattern::All) => {}
			Some(EventPattern::Exact(name)) => {
				if !taxonomy.contains(&name) {
					return Err(WebhookError::UnknownEvent(name));
				}
			}
			Some(EventPattern::Category(prefix)) => {
				if !categories.contains(prefix.as_str()) {
					return Err(WebhookError::UnknownEvent(raw.clone()));
				}
			}
		}
	}
	Ok(())
}

pub fn validate_subscription(sub: &WebhookSubscription, taxonomy: &EventTaxonomy) -> Result<()> {
	validate_url(&sub.url)?;
	validate_event_patterns(&sub.events, taxonomy)?;
	if sub.timeout.is_zero() {
		return Err(WebhookError::Internal("timeout must be non-zero".to_string()));
	}
	if sub.max_retries == 0 {
		return Err(WebhookError::Internal("max_retries must be non-zero".to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn patterns(p: &[&str]) -> Vec<String> {
		p.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_valid_urls() {
		assert!(validate_url("https://example.com/hook").is_ok());
		assert!(validate_url("http://127.0.0.1:8080/x?y=1").is_ok());
	}

	#[test]
	fn test_invalid_urls() {
		for raw in ["", "not a url", "/relative", "ftp://example.com", "mailto:a@b.c"] {
			assert!(
				matches!(validate_url(raw), Err(WebhookError::InvalidUrl(_))),
				"{raw:?}"
			);
		}
	}

	#[test]
	fn test_patterns_against_taxonomy() {
		let taxonomy = EventTaxonomy::default();
		assert!(validate_event_patterns(&patterns(&["*"]), &taxonomy).is_ok());
		assert!(validate_event_patterns(&patterns(&["report.*", "bank.connected"]), &taxonomy).is_ok());

		assert!(matches!(
			validate_event_patterns(&patterns(&["report.exploded"]), &taxonomy),
			Err(WebhookError::UnknownEvent(_))
		));
		assert!(matches!(
			validate_event_patterns(&patterns(&["nope.*"]), &taxonomy),
			Err(WebhookError::UnknownEvent(_))
		));
		assert!(matches!(
			validate_event_patterns(&patterns(&["a*"]), &taxonomy),
			Err(WebhookError::InvalidEventPattern(_))
		));
		assert!(matches!(
			validate_event_patterns(&[], &taxonomy),
			Err(WebhookError::InvalidEventPattern(_))
		));
	}

	#[test]
	fn test_subscription_validation() {
		let taxonomy = EventTaxonomy::default();
		let sub = WebhookSubscription::new(
			uuid::Uuid::new_v4(),
			"ops",
			"https://example.com/hook",
			patterns(&["report.*"]),
		);
		assert!(validate_subscription(&sub, &taxonomy).is_ok());

		let bad = sub.clone().with_max_retries(0);
		assert!(validate_subscription(&bad, &taxonomy).is_err());
	}
}
