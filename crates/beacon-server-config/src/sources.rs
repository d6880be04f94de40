// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, LoggingConfigLayer, RetryConfigLayer, RetryStrategy, WebhooksConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/beacon/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: BEACON_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()),
			webhooks: Some(load_webhooks_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::invalid(name, format!("invalid {kind} value '{v}'"))),
		None => Ok(None),
	}
}

fn env_list<T: FromStr>(name: &str, kind: &str) -> Result<Option<Vec<T>>, ConfigError> {
	match env_var(name) {
		Some(v) => parse_list(&v)
			.map(Some)
			.map_err(|bad| ConfigError::invalid(name, format!("invalid {kind} value '{bad}'"))),
		None => Ok(None),
	}
}

/// Split a comma separated list, dropping blanks. Returns the first bad item on failure.
fn parse_list<T: FromStr>(raw: &str) -> Result<Vec<T>, String> {
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|s| s.parse().map_err(|_| s.to_string()))
		.collect()
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("BEACON_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("BEACON_LOG_LEVEL"),
		json: env_bool("BEACON_LOG_JSON"),
	}
}

fn load_webhooks_from_env() -> Result<WebhooksConfigLayer, ConfigError> {
	let strategy = env_var("BEACON_WEBHOOK_RETRY_STRATEGY")
		.map(|s| s.parse::<RetryStrategy>())
		.transpose()?;

	Ok(WebhooksConfigLayer {
		default_timeout_secs: env_parse("BEACON_WEBHOOK_TIMEOUT_SECS", "u64")?,
		default_max_retries: env_parse("BEACON_WEBHOOK_MAX_RETRIES", "u32")?,
		worker_concurrency: env_parse("BEACON_WEBHOOK_WORKER_CONCURRENCY", "usize")?,
		max_response_body_bytes: env_parse("BEACON_WEBHOOK_MAX_RESPONSE_BODY_BYTES", "usize")?,
		user_agent: env_var("BEACON_WEBHOOK_USER_AGENT"),
		auto_disable_after_failures: env_parse("BEACON_WEBHOOK_AUTO_DISABLE_AFTER", "u32")?,
		non_retriable_statuses: env_list("BEACON_WEBHOOK_NON_RETRIABLE_STATUSES", "status")?,
		signature_tolerance_secs: env_parse("BEACON_WEBHOOK_SIGNATURE_TOLERANCE_SECS", "u64")?,
		recovery_interval_secs: env_parse("BEACON_WEBHOOK_RECOVERY_INTERVAL_SECS", "u64")?,
		extra_events: env_list("BEACON_WEBHOOK_EXTRA_EVENTS", "event")?,
		retry: Some(RetryConfigLayer {
			strategy,
			schedule_secs: env_list("BEACON_WEBHOOK_RETRY_SCHEDULE_SECS", "u64")?,
			base_delay_secs: env_parse("BEACON_WEBHOOK_RETRY_BASE_DELAY_SECS", "u64")?,
			factor: env_parse("BEACON_WEBHOOK_RETRY_FACTOR", "f64")?,
			max_delay_secs: env_parse("BEACON_WEBHOOK_RETRY_MAX_DELAY_SECS", "u64")?,
			jitter: env_bool("BEACON_WEBHOOK_RETRY_JITTER"),
		}),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_parse_list_trims_and_skips_blanks() {
		let parsed: Vec<u16> = parse_list(" 400, 410 ,,").unwrap();
		assert_eq!(parsed, vec![400, 410]);
	}

	#[test]
	fn test_parse_list_reports_bad_item() {
		let err = parse_list::<u64>("60,soon,300").unwrap_err();
		assert_eq!(err, "soon");
	}

	#[test]
	fn test_precedence_order() {
		assert!(Precedence::Defaults < Precedence::ConfigFile);
		assert!(Precedence::ConfigFile < Precedence::Environment);
	}

	#[test]
	fn test_missing_toml_file_is_empty_layer() {
		let source = TomlSource::new("/nonexistent/beacon.toml");
		let layer = source.load().unwrap();
		assert!(layer.webhooks.is_none());
	}

	#[test]
	fn test_toml_file_is_loaded() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[database]
url = "sqlite:/tmp/hooks.db"

[webhooks]
worker_concurrency = 4

[webhooks.retry]
schedule_secs = [1, 2, 3]
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(
			layer.database.unwrap().url.as_deref(),
			Some("sqlite:/tmp/hooks.db")
		);
		let webhooks = layer.webhooks.unwrap();
		assert_eq!(webhooks.worker_concurrency, Some(4));
		assert_eq!(webhooks.retry.unwrap().schedule_secs, Some(vec![1, 2, 3]));
	}

	#[test]
	fn test_malformed_toml_is_parse_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[webhooks\nworker_concurrency = ").unwrap();
		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}
}
