// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::events::EventPattern;
use crate::types::WebhookSubscription;

/// Whether `subscription` wants `event`. Unparseable patterns never match.
pub fn matches(subscription: &WebhookSubscription, event: &str) -> bool {
	matches_patterns(&subscription.events, event)
}

pub fn matches_patterns<S: AsRef<str>>(patterns: &[S], event: &str) -> bool {
	patterns
		.iter()
		.filter_map(|p| EventPattern::parse(p.as_ref()))
		.any(|p| p.matches(event))
}
