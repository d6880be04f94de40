// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_common_webhook::SigningSecret;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::{GuardedUpdate, WebhookDeliveryRecord, WebhookSubscriptionRecord};

const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, name, url, secret, events, headers, timeout_secs, \
	max_retries, is_active, success_count, failure_count, consecutive_failures, last_success_at, \
	last_failure_at, disabled_at, disabled_reason, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, webhook_id, event, payload, status, attempt, response_status, \
	response_body, response_time_ms, error_message, next_retry_at, created_at, updated_at";

#[derive(Clone)]
pub struct WebhookRepository {
	pool: SqlitePool,
}

impl WebhookRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	// =========================================================================
	// Subscriptions
	// =========================================================================

	#[tracing::instrument(skip(self, sub), fields(webhook_id = %sub.id, tenant_id = %sub.tenant_id))]
	pub async fn create_subscription(&self, sub: &WebhookSubscriptionRecord) -> Result<(), DbError> {
		let events_json = serde_json::to_string(&sub.events)?;
		let headers_json = serde_json::to_string(&sub.headers)?;

		sqlx::query(
			r#"
			INSERT INTO webhook_subscriptions (
				id, tenant_id, name, url, secret, events, headers, timeout_secs, max_retries,
				is_active, success_count, failure_count, consecutive_failures, last_success_at,
				last_failure_at, disabled_at, disabled_reason, created_at, updated_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(sub.id.to_string())
		.bind(sub.tenant_id.to_string())
		.bind(&sub.name)
		.bind(&sub.url)
		.bind(sub.secret.expose())
		.bind(&events_json)
		.bind(&headers_json)
		.bind(sub.timeout_secs)
		.bind(sub.max_retries)
		.bind(sub.is_active as i32)
		.bind(sub.success_count)
		.bind(sub.failure_count)
		.bind(sub.consecutive_failures)
		.bind(sub.last_success_at.map(fmt_ts))
		.bind(sub.last_failure_at.map(fmt_ts))
		.bind(sub.disabled_at.map(fmt_ts))
		.bind(&sub.disabled_reason)
		.bind(fmt_ts(sub.created_at))
		.bind(fmt_ts(sub.updated_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(webhook_id = %id))]
	pub async fn get_subscription(
		&self,
		id: Uuid,
	) -> Result<Option<WebhookSubscriptionRecord>, DbError> {
		let row = sqlx::query(&format!(
			"SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_subscription(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_active_subscriptions(
		&self,
		tenant_id: Option<Uuid>,
	) -> Result<Vec<WebhookSubscriptionRecord>, DbError> {
		let rows = match tenant_id {
			Some(tenant_id) => {
				sqlx::query(&format!(
					"SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
					 WHERE is_active = 1 AND tenant_id = ? ORDER BY created_at ASC"
				))
				.bind(tenant_id.to_string())
				.fetch_all(&self.pool)
				.await?
			}
			None => {
				sqlx::query(&format!(
					"SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
					 WHERE is_active = 1 ORDER BY created_at ASC"
				))
				.fetch_all(&self.pool)
				.await?
			}
		};

		rows.iter().map(row_to_subscription).collect()
	}

	/// Bump success counters in one statement and reset the failure streak.
	#[tracing::instrument(skip(self), fields(webhook_id = %id))]
	pub async fn record_subscription_success(
		&self,
		id: Uuid,
		at: DateTime<Utc>,
	) -> Result<(), DbError> {
		let result = sqlx::query(
			r#"
			UPDATE webhook_subscriptions
			SET success_count = success_count + 1,
				consecutive_failures = 0,
				last_success_at = ?,
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(fmt_ts(at))
		.bind(fmt_ts(at))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound("Webhook subscription not found".to_string()));
		}
		Ok(())
	}

	/// Bump failure counters in one statement. Returns the new failure streak.
	#[tracing::instrument(skip(self), fields(webhook_id = %id))]
	pub async fn record_subscription_failure(
		&self,
		id: Uuid,
		at: DateTime<Utc>,
	) -> Result<i64, DbError> {
		let row = sqlx::query(
			r#"
			UPDATE webhook_subscriptions
			SET failure_count = failure_count + 1,
				consecutive_failures = consecutive_failures + 1,
				last_failure_at = ?,
				updated_at = ?
			WHERE id = ?
			RETURNING consecutive_failures
			"#,
		)
		.bind(fmt_ts(at))
		.bind(fmt_ts(at))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(row) => Ok(row.get("consecutive_failures")),
			None => Err(DbError::NotFound("Webhook subscription not found".to_string())),
		}
	}

	/// Returns false if the subscription was already inactive.
	#[tracing::instrument(skip(self, reason), fields(webhook_id = %id))]
	pub async fn deactivate_subscription(
		&self,
		id: Uuid,
		reason: &str,
		at: DateTime<Utc>,
	) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE webhook_subscriptions
			SET is_active = 0, disabled_at = ?, disabled_reason = ?, updated_at = ?
			WHERE id = ? AND is_active = 1
			"#,
		)
		.bind(fmt_ts(at))
		.bind(reason)
		.bind(fmt_ts(at))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	/// Turn a subscription back on and clear its disable state and failure
	/// streak. Returns false if it was already active.
	#[tracing::instrument(skip(self), fields(webhook_id = %id))]
	pub async fn activate_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE webhook_subscriptions
			SET is_active = 1, disabled_at = NULL, disabled_reason = NULL,
				consecutive_failures = 0, updated_at = ?
			WHERE id = ? AND is_active = 0
			"#,
		)
		.bind(fmt_ts(at))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() > 0 {
			return Ok(true);
		}
		match self.get_subscription(id).await? {
			Some(_) => Ok(false),
			None => Err(DbError::NotFound("Webhook subscription not found".to_string())),
		}
	}

	#[tracing::instrument(skip(self, secret), fields(webhook_id = %id))]
	pub async fn rotate_secret(
		&self,
		id: Uuid,
		secret: &SigningSecret,
		at: DateTime<Utc>,
	) -> Result<(), DbError> {
		let result = sqlx::query(
			r#"UPDATE webhook_subscriptions SET secret = ?, updated_at = ? WHERE id = ?"#,
		)
		.bind(secret.expose())
		.bind(fmt_ts(at))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound("Webhook subscription not found".to_string()));
		}
		Ok(())
	}

	// =========================================================================
	// Deliveries
	// =========================================================================

	#[tracing::instrument(skip(self, delivery), fields(delivery_id = %delivery.id, webhook_id = %delivery.webhook_id))]
	pub async fn create_delivery(&self, delivery: &WebhookDeliveryRecord) -> Result<(), DbError> {
		let payload_json = serde_json::to_string(&delivery.payload)?;

		sqlx::query(
			r#"
			INSERT INTO webhook_deliveries (
				id, webhook_id, event, payload, status, attempt, response_status, response_body,
				response_time_ms, error_message, next_retry_at, created_at, updated_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(delivery.id.to_string())
		.bind(delivery.webhook_id.to_string())
		.bind(&delivery.event)
		.bind(&payload_json)
		.bind(&delivery.status)
		.bind(delivery.attempt)
		.bind(delivery.response_status)
		.bind(&delivery.response_body)
		.bind(delivery.response_time_ms)
		.bind(&delivery.error_message)
		.bind(delivery.next_retry_at.map(fmt_ts))
		.bind(fmt_ts(delivery.created_at))
		.bind(fmt_ts(delivery.updated_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(delivery_id = %id))]
	pub async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDeliveryRecord>, DbError> {
		let row = sqlx::query(&format!(
			"SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_delivery(&r)).transpose()
	}

	/// Start attempt `expected_attempt + 1` in one statement.
	///
	/// Only a `pending` or `retrying` row still at `expected_attempt` can be
	/// claimed, or an `in_flight` one last touched before `stale_before`.
	/// Returns false when another worker claimed it first.
	#[tracing::instrument(skip(self), fields(delivery_id = %id, expected_attempt = expected_attempt))]
	pub async fn claim_delivery(
		&self,
		id: Uuid,
		expected_attempt: i64,
		now: DateTime<Utc>,
		stale_before: DateTime<Utc>,
	) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE webhook_deliveries
			SET status = 'in_flight', attempt = attempt + 1, next_retry_at = NULL, updated_at = ?
			WHERE id = ?
				AND attempt = ?
				AND (
					status IN ('pending', 'retrying')
					OR (status = 'in_flight' AND updated_at < ?)
				)
			"#,
		)
		.bind(fmt_ts(now))
		.bind(id.to_string())
		.bind(expected_attempt)
		.bind(fmt_ts(stale_before))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	/// Overwrite a delivery unless it is terminal or the write lowers `attempt`.
	#[tracing::instrument(skip(self, delivery), fields(delivery_id = %delivery.id, status = %delivery.status, attempt = delivery.attempt))]
	pub async fn update_delivery(
		&self,
		delivery: &WebhookDeliveryRecord,
	) -> Result<GuardedUpdate, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE webhook_deliveries
			SET status = ?, attempt = ?, response_status = ?, response_body = ?,
				response_time_ms = ?, error_message = ?, next_retry_at = ?, updated_at = ?
			WHERE id = ?
				AND status NOT IN ('success', 'permanently_failed')
				AND attempt <= ?
			"#,
		)
		.bind(&delivery.status)
		.bind(delivery.attempt)
		.bind(delivery.response_status)
		.bind(&delivery.response_body)
		.bind(delivery.response_time_ms)
		.bind(&delivery.error_message)
		.bind(delivery.next_retry_at.map(fmt_ts))
		.bind(fmt_ts(delivery.updated_at))
		.bind(delivery.id.to_string())
		.bind(delivery.attempt)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() > 0 {
			return Ok(GuardedUpdate::Applied);
		}

		let current = sqlx::query(r#"SELECT status, attempt FROM webhook_deliveries WHERE id = ?"#)
			.bind(delivery.id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		Ok(match current {
			None => GuardedUpdate::Missing,
			Some(row) => {
				let status: String = row.get("status");
				if crate::types::TERMINAL_DELIVERY_STATUSES.contains(&status.as_str()) {
					GuardedUpdate::Terminal { status }
				} else {
					GuardedUpdate::StaleAttempt {
						stored: row.get("attempt"),
					}
				}
			}
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_unfinished_deliveries(&self) -> Result<Vec<WebhookDeliveryRecord>, DbError> {
		let rows = sqlx::query(&format!(
			"SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
			 WHERE status IN ('pending', 'in_flight', 'retrying') \
			 ORDER BY created_at ASC, id ASC"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_delivery).collect()
	}

	#[tracing::instrument(skip(self), fields(webhook_id = %webhook_id, limit = limit))]
	pub async fn list_deliveries_for_subscription(
		&self,
		webhook_id: Uuid,
		limit: u32,
	) -> Result<Vec<WebhookDeliveryRecord>, DbError> {
		let rows = sqlx::query(&format!(
			"SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
			 WHERE webhook_id = ? ORDER BY created_at DESC, id DESC LIMIT ?"
		))
		.bind(webhook_id.to_string())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_delivery).collect()
	}
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn fmt_ts(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(s)
		.map(|d| d.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(e.to_string()))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
	s.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, DbError> {
	Uuid::parse_str(s).map_err(|e| DbError::Internal(e.to_string()))
}

fn row_to_subscription(
	row: &sqlx::sqlite::SqliteRow,
) -> Result<WebhookSubscriptionRecord, DbError> {
	let id_str: String = row.get("id");
	let tenant_id_str: String = row.get("tenant_id");
	let events_str: String = row.get("events");
	let headers_str: String = row.get("headers");
	let created_at_str: String = row.get("created_at");
	let updated_at_str: String = row.get("updated_at");

	Ok(WebhookSubscriptionRecord {
		id: parse_uuid(&id_str)?,
		tenant_id: parse_uuid(&tenant_id_str)?,
		name: row.get("name"),
		url: row.get("url"),
		secret: SigningSecret::new(row.get::<String, _>("secret")),
		events: serde_json::from_str(&events_str)?,
		headers: serde_json::from_str(&headers_str)?,
		timeout_secs: row.get("timeout_secs"),
		max_retries: row.get("max_retries"),
		is_active: row.get::<i32, _>("is_active") != 0,
		success_count: row.get("success_count"),
		failure_count: row.get("failure_count"),
		consecutive_failures: row.get("consecutive_failures"),
		last_success_at: parse_opt_ts(row.get("last_success_at"))?,
		last_failure_at: parse_opt_ts(row.get("last_failure_at"))?,
		disabled_at: parse_opt_ts(row.get("disabled_at"))?,
		disabled_reason: row.get("disabled_reason"),
		created_at: parse_ts(&created_at_str)?,
		updated_at: parse_ts(&updated_at_str)?,
	})
}

fn row_to_delivery(row: &sqlx::sqlite::SqliteRow) -> Result<WebhookDeliveryRecord, DbError> {
	let id_str: String = row.get("id");
	let webhook_id_str: String = row.get("webhook_id");
	let payload_str: String = row.get("payload");
	let created_at_str: String = row.get("created_at");
	let updated_at_str: String = row.get("updated_at");

	Ok(WebhookDeliveryRecord {
		id: parse_uuid(&id_str)?,
		webhook_id: parse_uuid(&webhook_id_str)?,
		event: row.get("event"),
		payload: serde_json::from_str(&payload_str)?,
		status: row.get("status"),
		attempt: row.get("attempt"),
		response_status: row.get("response_status"),
		response_body: row.get("response_body"),
		response_time_ms: row.get("response_time_ms"),
		error_message: row.get("error_message"),
		next_retry_at: parse_opt_ts(row.get("next_retry_at"))?,
		created_at: parse_ts(&created_at_str)?,
		updated_at: parse_ts(&updated_at_str)?,
	})
}
