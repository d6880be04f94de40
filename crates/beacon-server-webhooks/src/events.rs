// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event patterns and the table of known event names.

use std::collections::{BTreeMap, BTreeSet};

/// Event fired by [`crate::DispatchRouter::send_test`].
pub const TEST_EVENT: &str = "webhook.test";

const DEFAULT_EVENTS: &[(&str, &str)] = &[
	("emission.calculated", "Emission calculation completed"),
	("emission.updated", "Emission data was updated"),
	("transaction.synced", "Transactions synced from a bank"),
	("transaction.categorized", "Transactions were categorized"),
	("transaction.validated", "Transactions were validated"),
	("report.generated", "Report generation finished"),
	("report.ready", "Report is ready for download"),
	("report.failed", "Report generation failed"),
	("bank.connected", "Bank account connected"),
	("bank.disconnected", "Bank account disconnected"),
	("bank.sync_completed", "Bank sync completed"),
	("bank.sync_failed", "Bank sync failed"),
	("energy.synced", "Energy data synced"),
	("subscription.created", "Billing subscription created"),
	("subscription.updated", "Billing subscription changed"),
	("subscription.canceled", "Billing subscription canceled"),
	("subscription.payment_failed", "Billing payment failed"),
	("alert.threshold_exceeded", "Emission threshold exceeded"),
	("alert.target_at_risk", "Reduction target at risk"),
	(TEST_EVENT, "Test event sent on request"),
];

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
	/// `*`
	All,
	/// `report.generated`
	Exact(String),
	/// `report.*`, stored without the trailing `.*`.
	Category(String),
}

impl EventPattern {
	/// Returns `None` for anything that is not `*`, `<category>.*` or a
	/// wildcard-free name.
	pub fn parse(pattern: &str) -> Option<Self> {
		if pattern == "*" {
			return Some(EventPattern::All);
		}
		if let Some(prefix) = pattern.strip_suffix(".*") {
			if prefix.is_empty() || prefix.contains('*') {
				return None;
			}
			return Some(EventPattern::Category(prefix.to_string()));
		}
		if pattern.is_empty() || pattern.contains('*') {
			return None;
		}
		Some(EventPattern::Exact(pattern.to_string()))
	}

	pub fn matches(&self, event: &str) -> bool {
		match self {
			EventPattern::All => true,
			EventPattern::Exact(name) => name == event,
			EventPattern::Category(prefix) => event
				.strip_prefix(prefix.as_str())
				.is_some_and(|rest| rest.starts_with('.')),
		}
	}
}

/// Known event names and their descriptions.
#[derive(Debug, Clone)]
pub struct EventTaxonomy {
	events: BTreeMap<String, String>,
}

impl Default for EventTaxonomy {
	fn default() -> Self {
		Self {
			events: DEFAULT_EVENTS
				.iter()
				.map(|(name, description)| (name.to_string(), description.to_string()))
				.collect(),
		}
	}
}

impl EventTaxonomy {
	pub fn empty() -> Self {
		Self {
			events: BTreeMap::new(),
		}
	}

	/// Add names without a description. Existing entries are kept.
	pub fn with_events<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		for name in names {
			self.events.entry(name.into()).or_default();
		}
		self
	}

	pub fn with_event(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
		self.events.insert(name.into(), description.into());
		self
	}

	pub fn contains(&self, event: &str) -> bool {
		self.events.contains_key(event)
	}

	pub fn describe(&self, event: &str) -> Option<&str> {
		self.events.get(event).map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.events.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// Distinct category prefixes, e.g. `report` for `report.generated`.
	pub fn categories(&self) -> BTreeSet<&str> {
		self.events
			.keys()
			.filter_map(|name| name.split_once('.').map(|(category, _)| category))
			.collect()
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}
}
