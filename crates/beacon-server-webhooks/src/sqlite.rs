// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use beacon_common_webhook::SigningSecret;
use beacon_server_db::{
	DbError, GuardedUpdate, WebhookDeliveryRecord, WebhookRepository, WebhookSubscriptionRecord,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::store::WebhookStore;
use crate::types::{Delivery, DeliveryStatus, WebhookSubscription};

/// [`WebhookStore`] over the SQLite repository.
pub struct SqliteWebhookStore {
	db: WebhookRepository,
}

impl SqliteWebhookStore {
	pub fn new(db: WebhookRepository) -> Self {
		Self { db }
	}

	fn record_to_subscription(record: WebhookSubscriptionRecord) -> Result<WebhookSubscription> {
		Ok(WebhookSubscription {
			id: record.id,
			tenant_id: record.tenant_id,
			name: record.name,
			url: record.url,
			secret: record.secret,
			events: record.events,
			headers: record.headers,
			timeout: Duration::from_secs(non_negative(record.timeout_secs, "timeout_secs")?),
			max_retries: narrow(record.max_retries, "max_retries")?,
			is_active: record.is_active,
			success_count: non_negative(record.success_count, "success_count")?,
			failure_count: non_negative(record.failure_count, "failure_count")?,
			consecutive_failures: narrow(record.consecutive_failures, "consecutive_failures")?,
			last_success_at: record.last_success_at,
			last_failure_at: record.last_failure_at,
			disabled_at: record.disabled_at,
			disabled_reason: record.disabled_reason,
			created_at: record.created_at,
			updated_at: record.updated_at,
		})
	}

	fn subscription_to_record(sub: &WebhookSubscription) -> WebhookSubscriptionRecord {
		WebhookSubscriptionRecord {
			id: sub.id,
			tenant_id: sub.tenant_id,
			name: sub.name.clone(),
			url: sub.url.clone(),
			secret: sub.secret.clone(),
			events: sub.events.clone(),
			headers: sub.headers.clone(),
			timeout_secs: sub.timeout.as_secs() as i64,
			max_retries: sub.max_retries as i64,
			is_active: sub.is_active,
			success_count: sub.success_count as i64,
			failure_count: sub.failure_count as i64,
			consecutive_failures: sub.consecutive_failures as i64,
			last_success_at: sub.last_success_at,
			last_failure_at: sub.last_failure_at,
			disabled_at: sub.disabled_at,
			disabled_reason: sub.disabled_reason.clone(),
			created_at: sub.created_at,
			updated_at: sub.updated_at,
		}
	}

	fn record_to_delivery(record: WebhookDeliveryRecord) -> Result<Delivery> {
		Ok(Delivery {
			id: record.id,
			subscription_id: record.webhook_id,
			event: record.event,
			payload: record.payload,
			status: parse_status(&record.status)?,
			attempt: narrow(record.attempt, "attempt")?,
			response_status: record
				.response_status
				.map(|s| narrow(s, "response_status"))
				.transpose()?,
			response_body: record.response_body,
			response_time_ms: record
				.response_time_ms
				.map(|ms| non_negative(ms, "response_time_ms"))
				.transpose()?,
			error_message: record.error_message,
			next_retry_at: record.next_retry_at,
			created_at: record.created_at,
			updated_at: record.updated_at,
		})
	}

	fn delivery_to_record(delivery: &Delivery) -> WebhookDeliveryRecord {
		WebhookDeliveryRecord {
			id: delivery.id,
			webhook_id: delivery.subscription_id,
			event: delivery.event.clone(),
			payload: delivery.payload.clone(),
			status: delivery.status.as_str().to_string(),
			attempt: delivery.attempt as i64,
			response_status: delivery.response_status.map(i64::from),
			response_body: delivery.response_body.clone(),
			response_time_ms: delivery.response_time_ms.map(|ms| ms as i64),
			error_message: delivery.error_message.clone(),
			next_retry_at: delivery.next_retry_at,
			created_at: delivery.created_at,
			updated_at: delivery.updated_at,
		}
	}
}

fn decode_err(message: String) -> WebhookError {
	WebhookError::Database(DbError::Internal(message))
}

fn parse_status(s: &str) -> Result<DeliveryStatus> {
	s.parse::<DeliveryStatus>()
		.map_err(|_| decode_err(format!("invalid delivery status: {s}")))
}

fn non_negative(value: i64, column: &str) -> Result<u64> {
	u64::try_from(value).map_err(|_| decode_err(format!("invalid {column}: {value}")))
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T> {
	T::try_from(value).map_err(|_| decode_err(format!("invalid {column}: {value}")))
}

fn subscription_err(id: Uuid) -> impl FnOnce(DbError) -> WebhookError {
	move |e| match e {
		DbError::NotFound(_) => WebhookError::SubscriptionNotFound(id),
		other => WebhookError::Database(other),
	}
}

#[async_trait]
impl WebhookStore for SqliteWebhookStore {
	async fn create_subscription(&self, subscription: &WebhookSubscription) -> Result<()> {
		let record = Self::subscription_to_record(subscription);
		self.db.create_subscription(&record).await?;
		Ok(())
	}

	async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>> {
		let record = self.db.get_subscription(id).await?;
		record.map(Self::record_to_subscription).transpose()
	}

	async fn list_active_subscriptions(
		&self,
		tenant_id: Option<Uuid>,
	) -> Result<Vec<WebhookSubscription>> {
		let records = self.db.list_active_subscriptions(tenant_id).await?;
		records
			.into_iter()
			.map(Self::record_to_subscription)
			.collect()
	}

	async fn record_subscription_success(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
		self.db
			.record_subscription_success(id, at)
			.await
			.map_err(subscription_err(id))
	}

	async fn record_subscription_failure(&self, id: Uuid, at: DateTime<Utc>) -> Result<u32> {
		let streak = self
			.db
			.record_subscription_failure(id, at)
			.await
			.map_err(subscription_err(id))?;
		narrow(streak, "consecutive_failures")
	}

	async fn deactivate_subscription(
		&self,
		id: Uuid,
		reason: &str,
		at: DateTime<Utc>,
	) -> Result<bool> {
		Ok(self.db.deactivate_subscription(id, reason, at).await?)
	}

	async fn activate_subscription(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
		self.db
			.activate_subscription(id, at)
			.await
			.map_err(subscription_err(id))
	}

	async fn rotate_secret(
		&self,
		id: Uuid,
		secret: &SigningSecret,
		at: DateTime<Utc>,
	) -> Result<()> {
		self.db
			.rotate_secret(id, secret, at)
			.await
			.map_err(subscription_err(id))
	}

	async fn create_delivery(&self, delivery: &Delivery) -> Result<()> {
		let record = Self::delivery_to_record(delivery);
		self.db.create_delivery(&record).await?;
		Ok(())
	}

	async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>> {
		let record = self.db.get_delivery(id).await?;
		record.map(Self::record_to_delivery).transpose()
	}

	async fn claim_delivery(
		&self,
		id: Uuid,
		expected_attempt: u32,
		now: DateTime<Utc>,
		stale_before: DateTime<Utc>,
	) -> Result<bool> {
		Ok(self
			.db
			.claim_delivery(id, i64::from(expected_attempt), now, stale_before)
			.await?)
	}

	async fn update_delivery(&self, delivery: &Delivery) -> Result<()> {
		let record = Self::delivery_to_record(delivery);
		match self.db.update_delivery(&record).await? {
			GuardedUpdate::Applied => Ok(()),
			GuardedUpdate::Missing => Err(WebhookError::DeliveryNotFound(delivery.id)),
			GuardedUpdate::Terminal { status } => Err(WebhookError::TerminalDelivery {
				id: delivery.id,
				status: parse_status(&status)?,
			}),
			GuardedUpdate::StaleAttempt { stored } => Err(WebhookError::AttemptRegression {
				id: delivery.id,
				stored: narrow(stored, "attempt")?,
				attempted: delivery.attempt,
			}),
		}
	}

	async fn list_unfinished_deliveries(&self) -> Result<Vec<Delivery>> {
		let records = self.db.list_unfinished_deliveries().await?;
		records.into_iter().map(Self::record_to_delivery).collect()
	}

	async fn list_deliveries_for_subscription(
		&self,
		subscription_id: Uuid,
		limit: u32,
	) -> Result<Vec<Delivery>> {
		let records = self
			.db
			.list_deliveries_for_subscription(subscription_id, limit)
			.await?;
		records.into_iter().map(Self::record_to_delivery).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_server_db::testing::create_migrated_test_pool;
	use serde_json::json;

	async fn make_store() -> SqliteWebhookStore {
		let pool = create_migrated_test_pool().await;
		SqliteWebhookStore::new(WebhookRepository::new(pool))
	}

	fn subscription() -> WebhookSubscription {
		WebhookSubscription::new(
			Uuid::new_v4(),
			"ops",
			"https://example.com/hook",
			vec!["report.*".to_string()],
		)
		.with_header("X-Team", "carbon")
		.with_timeout(Duration::from_secs(7))
		.with_max_retries(3)
	}

	#[tokio::test]
	async fn test_subscription_roundtrip() {
		let store = make_store().await;
		let sub = subscription();
		store.create_subscription(&sub).await.unwrap();

		let loaded = store.get_subscription(sub.id).await.unwrap().unwrap();
		assert_eq!(loaded.secret, sub.secret);
		assert_eq!(loaded.events, sub.events);
		assert_eq!(loaded.headers.get("X-Team").map(String::as_str), Some("carbon"));
		assert_eq!(loaded.timeout, Duration::from_secs(7));
		assert_eq!(loaded.max_retries, 3);
		assert!(loaded.is_active);
	}

	#[tokio::test]
	async fn test_failure_streak_and_not_found() {
		let store = make_store().await;
		let sub = subscription();
		store.create_subscription(&sub).await.unwrap();

		let now = Utc::now();
		assert_eq!(store.record_subscription_failure(sub.id, now).await.unwrap(), 1);
		assert_eq!(store.record_subscription_failure(sub.id, now).await.unwrap(), 2);
		store.record_subscription_success(sub.id, now).await.unwrap();
		assert_eq!(
			store
				.get_subscription(sub.id)
				.await
				.unwrap()
				.unwrap()
				.consecutive_failures,
			0
		);

		let missing = Uuid::new_v4();
		assert!(matches!(
			store.record_subscription_failure(missing, now).await,
			Err(WebhookError::SubscriptionNotFound(id)) if id == missing
		));
	}

	#[tokio::test]
	async fn test_rejects_terminal_and_stale_updates() {
		let store = make_store().await;
		let sub = subscription();
		store.create_subscription(&sub).await.unwrap();

		let mut delivery = Delivery::new(sub.id, "report.generated", json!({"id": 1}));
		store.create_delivery(&delivery).await.unwrap();

		delivery.attempt = 2;
		delivery.status = DeliveryStatus::Retrying;
		delivery.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(60));
		store.update_delivery(&delivery).await.unwrap();

		let mut stale = delivery.clone();
		stale.attempt = 1;
		assert!(matches!(
			store.update_delivery(&stale).await,
			Err(WebhookError::AttemptRegression { stored: 2, attempted: 1, .. })
		));

		delivery.status = DeliveryStatus::PermanentlyFailed;
		delivery.next_retry_at = None;
		store.update_delivery(&delivery).await.unwrap();

		delivery.status = DeliveryStatus::Retrying;
		delivery.attempt = 3;
		assert!(matches!(
			store.update_delivery(&delivery).await,
			Err(WebhookError::TerminalDelivery {
				status: DeliveryStatus::PermanentlyFailed,
				..
			})
		));

		let stored = store.get_delivery(delivery.id).await.unwrap().unwrap();
		assert_eq!(stored.status, DeliveryStatus::PermanentlyFailed);
		assert_eq!(stored.attempt, 2);
	}

	#[tokio::test]
	async fn test_claim_and_activate() {
		let store = make_store().await;
		let sub = subscription();
		store.create_subscription(&sub).await.unwrap();
		let delivery = Delivery::new(sub.id, "report.generated", json!({}));
		store.create_delivery(&delivery).await.unwrap();

		let now = Utc::now();
		let cutoff = now - chrono::Duration::seconds(60);
		assert!(store.claim_delivery(delivery.id, 0, now, cutoff).await.unwrap());
		assert!(!store.claim_delivery(delivery.id, 0, now, cutoff).await.unwrap());
		let stored = store.get_delivery(delivery.id).await.unwrap().unwrap();
		assert_eq!(stored.status, DeliveryStatus::InFlight);
		assert_eq!(stored.attempt, 1);

		store.deactivate_subscription(sub.id, "manual", now).await.unwrap();
		assert!(store.activate_subscription(sub.id, now).await.unwrap());
		assert!(store.get_subscription(sub.id).await.unwrap().unwrap().is_active);
		assert!(matches!(
			store.activate_subscription(Uuid::new_v4(), now).await,
			Err(WebhookError::SubscriptionNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_update_missing_delivery() {
		let store = make_store().await;
		let sub = subscription();
		store.create_subscription(&sub).await.unwrap();
		let delivery = Delivery::new(sub.id, "report.generated", json!({}));
		assert!(matches!(
			store.update_delivery(&delivery).await,
			Err(WebhookError::DeliveryNotFound(_))
		));
	}
}
