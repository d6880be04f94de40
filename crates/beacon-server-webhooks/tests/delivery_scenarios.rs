// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end delivery sequences against a mock receiver.
//!
//! Retries are driven by hand through a [`RecordingQueue`] so no test waits
//! on the real backoff schedule.

use std::sync::Arc;
use std::time::Duration;

use beacon_server_jobs::testing::RecordingQueue;
use beacon_server_webhooks::{
	DeliveryExecutor, DeliverySettings, DeliveryStatus, DeliveryTask, DeliveryWorker,
	DispatchRouter, EventTaxonomy, InMemoryWebhookStore, Outcome, RetryDecision, RetryPolicy,
	RetryScheduler, WebhookStore, WebhookSubscription,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
	store: Arc<InMemoryWebhookStore>,
	queue: Arc<RecordingQueue<DeliveryTask>>,
	router: DispatchRouter,
	executor: DeliveryExecutor,
	scheduler: RetryScheduler,
	worker: DeliveryWorker,
}

fn harness(settings: DeliverySettings) -> Harness {
	let store = Arc::new(InMemoryWebhookStore::new());
	let queue = Arc::new(RecordingQueue::<DeliveryTask>::new());
	let router = DispatchRouter::new(store.clone(), queue.clone(), EventTaxonomy::default());
	let executor = DeliveryExecutor::new(store.clone(), settings.clone());
	let scheduler = RetryScheduler::new(store.clone(), queue.clone(), RetryPolicy::default());
	let worker = DeliveryWorker::new(
		store.clone(),
		queue.clone(),
		DeliveryExecutor::new(store.clone(), settings),
		RetryScheduler::new(store.clone(), queue.clone(), RetryPolicy::default()),
	);
	Harness {
		store,
		queue,
		router,
		executor,
		scheduler,
		worker,
	}
}

impl Harness {
	async fn subscribe(&self, url: &str, events: &[&str]) -> WebhookSubscription {
		let sub = WebhookSubscription::new(
			Uuid::new_v4(),
			"receiver",
			url,
			events.iter().map(|e| e.to_string()).collect(),
		);
		self.router.register_subscription(&sub).await.unwrap();
		sub
	}

	/// Take the delivery off the queue and run one attempt, ignoring
	/// `next_retry_at`. Returns the outcome and the scheduled retry, if any.
	async fn attempt(&self, delivery_id: Uuid) -> (Outcome, Option<DateTime<Utc>>) {
		let (task, _) = self.queue.pop().expect("delivery should be queued");
		assert_eq!(task.delivery_id, delivery_id);

		let mut delivery = self.store.get_delivery(delivery_id).await.unwrap().unwrap();
		let sub = self
			.store
			.get_subscription(delivery.subscription_id)
			.await
			.unwrap();
		let outcome = self
			.executor
			.execute(&mut delivery, sub.as_ref())
			.await
			.unwrap();

		let mut retry_at = None;
		if outcome == Outcome::Retriable {
			match self
				.scheduler
				.schedule(&mut delivery, sub.as_ref().unwrap())
				.await
				.unwrap()
			{
				RetryDecision::Scheduled { at } => retry_at = Some(at),
				RetryDecision::Exhausted => {}
			}
		}
		(outcome, retry_at)
	}
}

#[tokio::test]
async fn scenario_a_dispatch_matches_by_category() {
	let h = harness(DeliverySettings::default());
	let reports = h.subscribe("https://reports.example.com/hook", &["report.*"]).await;
	h.subscribe("https://banks.example.com/hook", &["bank.*"]).await;

	let ids = h
		.router
		.dispatch("report.generated", json!({"report_id": 42}), None)
		.await
		.unwrap();

	assert_eq!(ids.len(), 1);
	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.subscription_id, reports.id);
	assert_eq!(delivery.status, DeliveryStatus::Pending);
	assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn scenario_b_first_attempt_succeeds() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.expect(1)
		.mount(&server)
		.await;

	let h = harness(DeliverySettings::default());
	let sub = h.subscribe(&server.uri(), &["report.*"]).await;
	let ids = h
		.router
		.dispatch("report.generated", json!({}), None)
		.await
		.unwrap();

	let (outcome, retry_at) = h.attempt(ids[0]).await;
	assert_eq!(outcome, Outcome::Success);
	assert!(retry_at.is_none());

	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.status, DeliveryStatus::Success);
	assert_eq!(delivery.attempt, 1);
	assert_eq!(delivery.response_status, Some(200));
	assert_eq!(delivery.response_body.as_deref(), Some("ok"));
	assert!(delivery.response_time_ms.is_some());
	assert!(delivery.error_message.is_none());
	assert!(h.queue.is_empty());

	let sub = h.store.get_subscription(sub.id).await.unwrap().unwrap();
	assert_eq!(sub.success_count, 1);
	assert!(sub.last_success_at.is_some());
}

#[tokio::test]
async fn scenario_c_recovers_after_three_failures() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(500))
		.up_to_n_times(3)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let h = harness(DeliverySettings::default());
	let sub = h.subscribe(&server.uri(), &["*"]).await;
	let ids = h
		.router
		.dispatch("emission.calculated", json!({"kg": 12.5}), None)
		.await
		.unwrap();
	let id = ids[0];

	let mut retry_times = Vec::new();
	let mut attempts = Vec::new();
	for _ in 0..3 {
		let (outcome, retry_at) = h.attempt(id).await;
		assert_eq!(outcome, Outcome::Retriable);
		retry_times.push(retry_at.expect("retry should be scheduled"));

		let delivery = h.store.get_delivery(id).await.unwrap().unwrap();
		assert_eq!(delivery.status, DeliveryStatus::Retrying);
		assert_eq!(delivery.error_message.as_deref(), Some("HTTP 500"));
		assert_eq!(delivery.next_retry_at, retry_at);
		attempts.push(delivery.attempt);
	}
	assert_eq!(attempts, vec![1, 2, 3]);
	assert!(retry_times.windows(2).all(|w| w[0] < w[1]));

	let (outcome, _) = h.attempt(id).await;
	assert_eq!(outcome, Outcome::Success);
	let delivery = h.store.get_delivery(id).await.unwrap().unwrap();
	assert_eq!(delivery.status, DeliveryStatus::Success);
	assert_eq!(delivery.attempt, 4);
	assert!(delivery.next_retry_at.is_none());
	assert!(delivery.error_message.is_none());

	let sub = h.store.get_subscription(sub.id).await.unwrap().unwrap();
	assert_eq!(sub.failure_count, 3);
	assert_eq!(sub.success_count, 1);
	assert_eq!(sub.consecutive_failures, 0);
}

#[tokio::test]
async fn scenario_d_timeouts_exhaust_retries() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
		.mount(&server)
		.await;

	let h = harness(DeliverySettings::default());
	let sub = WebhookSubscription::new(
		Uuid::new_v4(),
		"slow",
		server.uri(),
		vec!["report.*".to_string()],
	)
	.with_timeout(Duration::from_millis(200));
	h.router.register_subscription(&sub).await.unwrap();

	let ids = h
		.router
		.dispatch("report.ready", json!({}), None)
		.await
		.unwrap();

	let mut outcomes = Vec::new();
	for _ in 0..sub.max_retries {
		outcomes.push(h.attempt(ids[0]).await.0);
	}
	assert_eq!(
		outcomes,
		vec![
			Outcome::Retriable,
			Outcome::Retriable,
			Outcome::Retriable,
			Outcome::Retriable,
			Outcome::Permanent,
		]
	);

	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.status, DeliveryStatus::PermanentlyFailed);
	assert_eq!(delivery.attempt, sub.max_retries);
	assert!(delivery.response_status.is_none());
	assert!(delivery.error_message.unwrap().contains("timed out"));
	assert!(h.queue.is_empty());
}

#[tokio::test]
async fn fifth_failure_is_permanent_with_default_budget() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(503))
		.expect(5)
		.mount(&server)
		.await;

	let h = harness(DeliverySettings::default());
	let sub = h.subscribe(&server.uri(), &["bank.*"]).await;
	assert_eq!(sub.max_retries, 5);
	let ids = h
		.router
		.dispatch("bank.sync_failed", json!({}), None)
		.await
		.unwrap();

	for attempt in 1..=4 {
		let (outcome, _) = h.attempt(ids[0]).await;
		assert_eq!(outcome, Outcome::Retriable, "attempt {attempt}");
	}
	let (outcome, retry_at) = h.attempt(ids[0]).await;
	assert_eq!(outcome, Outcome::Permanent);
	assert!(retry_at.is_none());

	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.attempt, 5);
	assert_eq!(delivery.error_message.as_deref(), Some("HTTP 503"));
}

#[tokio::test]
async fn finished_delivery_is_never_attempted_again() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&server)
		.await;

	let h = harness(DeliverySettings::default());
	h.subscribe(&server.uri(), &["*"]).await;
	let ids = h
		.router
		.dispatch("energy.synced", json!({}), None)
		.await
		.unwrap();

	assert_eq!(
		h.worker.process(ids[0]).await.unwrap(),
		Some(Outcome::Success)
	);
	assert_eq!(h.worker.process(ids[0]).await.unwrap(), None);

	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.attempt, 1);
	assert_eq!(delivery.status, DeliveryStatus::Success);
}

#[tokio::test]
async fn consecutive_failures_disable_subscription() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(500))
		.expect(3)
		.mount(&server)
		.await;

	let settings = DeliverySettings {
		auto_disable_after_failures: Some(3),
		..DeliverySettings::default()
	};
	let h = harness(settings);
	let sub = WebhookSubscription::new(
		Uuid::new_v4(),
		"flaky",
		server.uri(),
		vec!["*".to_string()],
	)
	.with_max_retries(10);
	h.router.register_subscription(&sub).await.unwrap();

	let ids = h
		.router
		.dispatch("alert.threshold_exceeded", json!({}), None)
		.await
		.unwrap();
	for _ in 0..3 {
		assert_eq!(h.attempt(ids[0]).await.0, Outcome::Retriable);
	}

	let disabled = h.store.get_subscription(sub.id).await.unwrap().unwrap();
	assert!(!disabled.is_active);
	assert_eq!(disabled.consecutive_failures, 3);
	assert!(disabled.disabled_at.is_some());
	assert!(disabled.disabled_reason.unwrap().contains("3 consecutive failures"));

	// The retry already queued short-circuits without a request.
	let (outcome, _) = h.attempt(ids[0]).await;
	assert_eq!(outcome, Outcome::Permanent);
	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.status, DeliveryStatus::PermanentlyFailed);
	assert_eq!(delivery.attempt, 3);

	// New events no longer reach it.
	let ids = h
		.router
		.dispatch("alert.threshold_exceeded", json!({}), None)
		.await
		.unwrap();
	assert!(ids.is_empty());
}

#[tokio::test]
async fn re_enabled_subscription_receives_events_again() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(500))
		.up_to_n_times(2)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let settings = DeliverySettings {
		auto_disable_after_failures: Some(2),
		..DeliverySettings::default()
	};
	let h = harness(settings);
	let sub = h.subscribe(&server.uri(), &["alert.*"]).await;
	let ids = h
		.router
		.dispatch("alert.target_at_risk", json!({}), None)
		.await
		.unwrap();
	for _ in 0..2 {
		assert_eq!(h.attempt(ids[0]).await.0, Outcome::Retriable);
	}
	assert!(!h.store.get_subscription(sub.id).await.unwrap().unwrap().is_active);
	assert_eq!(h.attempt(ids[0]).await.0, Outcome::Permanent);

	assert!(h.router.enable_subscription(sub.id).await.unwrap());
	let enabled = h.store.get_subscription(sub.id).await.unwrap().unwrap();
	assert!(enabled.is_active);
	assert_eq!(enabled.consecutive_failures, 0);
	assert!(enabled.disabled_at.is_none());
	assert!(enabled.disabled_reason.is_none());
	assert_eq!(enabled.failure_count, 2);

	let ids = h
		.router
		.dispatch("alert.target_at_risk", json!({}), None)
		.await
		.unwrap();
	assert_eq!(ids.len(), 1);
	assert_eq!(h.attempt(ids[0]).await.0, Outcome::Success);
}

#[tokio::test]
async fn inactive_subscription_gets_no_request() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let h = harness(DeliverySettings::default());
	let sub = h.subscribe(&server.uri(), &["*"]).await;
	let ids = h
		.router
		.dispatch("report.generated", json!({}), None)
		.await
		.unwrap();
	h.store
		.deactivate_subscription(sub.id, "paused by tenant", Utc::now())
		.await
		.unwrap();

	let (outcome, _) = h.attempt(ids[0]).await;
	assert_eq!(outcome, Outcome::Permanent);
	let delivery = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(delivery.attempt, 0);
	assert_eq!(
		delivery.error_message.as_deref(),
		Some("subscription is inactive")
	);
}

#[tokio::test]
async fn replay_delivers_as_new_record() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(422))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let settings = DeliverySettings {
		non_retriable_statuses: vec![422],
		..DeliverySettings::default()
	};
	let h = harness(settings);
	h.subscribe(&server.uri(), &["report.*"]).await;
	let ids = h
		.router
		.dispatch("report.failed", json!({"reason": "quota"}), None)
		.await
		.unwrap();

	assert_eq!(h.attempt(ids[0]).await.0, Outcome::Permanent);
	let original = h.store.get_delivery(ids[0]).await.unwrap().unwrap();
	assert_eq!(original.status, DeliveryStatus::PermanentlyFailed);

	let replay_id = h.router.replay(ids[0]).await.unwrap();
	assert_eq!(h.attempt(replay_id).await.0, Outcome::Success);

	let replay = h.store.get_delivery(replay_id).await.unwrap().unwrap();
	assert_eq!(replay.payload, original.payload);
	assert_eq!(replay.attempt, 1);
	assert_eq!(
		h.store.get_delivery(ids[0]).await.unwrap().unwrap(),
		original
	);
}
