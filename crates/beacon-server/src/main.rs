// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beacon webhook delivery server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beacon_common_webhook::verify;
use beacon_server_config::ServerConfig;
use beacon_server_db::WebhookRepository;
use beacon_server_webhooks::{
	Delivery, DeliveryStatus, SqliteWebhookStore, WebhookEngine, WebhookStore, WebhookSubscription,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod wiring;

/// Beacon server - signed outbound webhook delivery.
#[derive(Parser, Debug)]
#[command(
	name = "beacon-server",
	about = "Beacon outbound webhook delivery server",
	version
)]
struct Args {
	/// Config file to read instead of /etc/beacon/server.toml
	#[arg(long, env = "BEACON_CONFIG")]
	config: Option<PathBuf>,

	/// Defaults to `serve`
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the delivery engine until interrupted
	Serve,
	/// Dispatch an event to every matching subscription
	Dispatch {
		#[arg(long)]
		event: String,
		/// JSON payload
		#[arg(long, default_value = "{}")]
		payload: String,
		/// Only notify this tenant's subscriptions
		#[arg(long)]
		tenant: Option<Uuid>,
		/// How long to wait for first attempts before exiting
		#[arg(long, default_value_t = 30)]
		wait_secs: u64,
	},
	/// List the known event names
	Events,
	/// Register a subscription and print its signing secret
	Subscribe {
		#[arg(long)]
		tenant: Uuid,
		#[arg(long)]
		name: String,
		#[arg(long)]
		url: String,
		/// Event pattern (`*`, `report.*` or an exact name); repeatable
		#[arg(long = "event", required = true)]
		events: Vec<String>,
		/// Custom header as NAME=VALUE; repeatable
		#[arg(long = "header", value_parser = parse_header)]
		headers: Vec<(String, String)>,
		#[arg(long)]
		timeout_secs: Option<u64>,
		#[arg(long)]
		max_retries: Option<u32>,
	},
	/// Send a `webhook.test` event to one subscription
	Test {
		subscription: Uuid,
		#[arg(long, default_value_t = 30)]
		wait_secs: u64,
	},
	/// Re-send a permanently failed delivery as a new delivery
	Replay {
		delivery: Uuid,
		#[arg(long, default_value_t = 30)]
		wait_secs: u64,
	},
	/// Show recent deliveries for a subscription, newest first
	History {
		subscription: Uuid,
		#[arg(long, default_value_t = 20)]
		limit: u32,
	},
	/// Replace a subscription's signing secret and print the new one
	RotateSecret { subscription: Uuid },
	/// Re-enable a disabled subscription and reset its failure streak
	Enable { subscription: Uuid },
	/// Check a signature the way a receiver would
	Verify {
		#[arg(long, env = "BEACON_VERIFY_SECRET", hide_env_values = true)]
		secret: String,
		#[arg(long)]
		timestamp: String,
		#[arg(long)]
		signature: String,
		/// File holding the exact request body
		#[arg(long)]
		payload_file: PathBuf,
	},
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
	raw.split_once('=')
		.map(|(name, value)| (name.trim().to_string(), value.to_string()))
		.filter(|(name, _)| !name.is_empty())
		.ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => beacon_server_config::load_config_with_file(path)?,
		None => beacon_server_config::load_config()?,
	};
	init_tracing(&config);

	match args.command.unwrap_or(Command::Serve) {
		Command::Events => {
			for (name, description) in wiring::taxonomy(&config.webhooks).iter() {
				println!("{name:<32}{description}");
			}
			Ok(())
		}
		Command::Verify {
			secret,
			timestamp,
			signature,
			payload_file,
		} => {
			let payload = std::fs::read(&payload_file)
				.with_context(|| format!("reading {}", payload_file.display()))?;
			let now = std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)?
				.as_secs() as i64;
			let tolerance = Duration::from_secs(config.webhooks.signature_tolerance_secs);
			verify(
				secret.as_bytes(),
				&payload,
				&timestamp,
				&signature,
				now,
				tolerance,
			)?;
			println!("signature valid");
			Ok(())
		}
		command => run_with_store(command, &config).await,
	}
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	if config.logging.json {
		registry
			.with(tracing_subscriber::fmt::layer().json())
			.init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}
}

async fn run_with_store(command: Command, config: &ServerConfig) -> anyhow::Result<()> {
	let pool = beacon_server_db::create_pool(&config.database.url).await?;
	beacon_server_db::run_migrations(&pool).await?;
	let store: Arc<dyn WebhookStore> =
		Arc::new(SqliteWebhookStore::new(WebhookRepository::new(pool)));

	let engine = WebhookEngine::start(Arc::clone(&store), wiring::engine_options(&config.webhooks));
	let result = run_command(command, config, &engine, store.as_ref()).await;
	engine.shutdown().await;
	result
}

async fn run_command(
	command: Command,
	config: &ServerConfig,
	engine: &WebhookEngine,
	store: &dyn WebhookStore,
) -> anyhow::Result<()> {
	let router = engine.router();
	match command {
		Command::Serve => serve(engine, config).await,
		Command::Dispatch {
			event,
			payload,
			tenant,
			wait_secs,
		} => {
			let payload: serde_json::Value =
				serde_json::from_str(&payload).context("payload is not valid JSON")?;
			let ids = router.dispatch(&event, payload, tenant).await?;
			if ids.is_empty() {
				println!("no active subscription matches {event}");
				return Ok(());
			}
			report(store, &ids, Duration::from_secs(wait_secs)).await
		}
		Command::Subscribe {
			tenant,
			name,
			url,
			events,
			headers,
			timeout_secs,
			max_retries,
		} => {
			let webhooks = &config.webhooks;
			let mut sub = WebhookSubscription::new(tenant, name, url, events)
				.with_timeout(Duration::from_secs(
					timeout_secs.unwrap_or(webhooks.default_timeout_secs),
				))
				.with_max_retries(max_retries.unwrap_or(webhooks.default_max_retries));
			for (name, value) in headers {
				sub = sub.with_header(name, value);
			}
			router.register_subscription(&sub).await?;
			println!("id:     {}", sub.id);
			println!("secret: {}", sub.secret.expose());
			Ok(())
		}
		Command::Test {
			subscription,
			wait_secs,
		} => {
			let id = router.send_test(subscription).await?;
			report(store, &[id], Duration::from_secs(wait_secs)).await
		}
		Command::Replay {
			delivery,
			wait_secs,
		} => {
			let id = router.replay(delivery).await?;
			report(store, &[id], Duration::from_secs(wait_secs)).await
		}
		Command::History {
			subscription,
			limit,
		} => {
			for delivery in router.delivery_history(subscription, limit).await? {
				print_delivery(&delivery);
			}
			Ok(())
		}
		Command::RotateSecret { subscription } => {
			let secret = router.rotate_secret(subscription).await?;
			println!("secret: {}", secret.expose());
			Ok(())
		}
		Command::Enable { subscription } => {
			if router.enable_subscription(subscription).await? {
				println!("enabled {subscription}");
			} else {
				println!("{subscription} is already active");
			}
			Ok(())
		}
		Command::Events | Command::Verify { .. } => Ok(()),
	}
}

async fn serve(engine: &WebhookEngine, config: &ServerConfig) -> anyhow::Result<()> {
	tracing::info!(
		database = %config.database.url,
		concurrency = config.webhooks.worker_concurrency,
		"starting beacon-server"
	);
	engine.recover().await?;

	// Picks up deliveries written by other processes, e.g. `beacon-server dispatch`.
	let mut sweep =
		tokio::time::interval(Duration::from_secs(config.webhooks.recovery_interval_secs));
	sweep.tick().await;

	let shutdown = tokio::signal::ctrl_c();
	tokio::pin!(shutdown);
	loop {
		tokio::select! {
			_ = sweep.tick() => {
				if let Err(e) = engine.recover().await {
					tracing::warn!(error = %e, "Recovery sweep failed");
				}
			}
			_ = &mut shutdown => {
				tracing::info!("Received shutdown signal");
				break;
			}
		}
	}

	tracing::info!(stats = ?engine.stats().await, "Server shutdown complete");
	Ok(())
}

/// Wait until every delivery has had its first attempt (or `wait` runs out),
/// then print where each one ended up.
async fn report(store: &dyn WebhookStore, ids: &[Uuid], wait: Duration) -> anyhow::Result<()> {
	let deadline = tokio::time::Instant::now() + wait;
	let deliveries = loop {
		let mut deliveries = Vec::with_capacity(ids.len());
		for id in ids {
			let delivery = store
				.get_delivery(*id)
				.await?
				.with_context(|| format!("delivery {id} not found"))?;
			deliveries.push(delivery);
		}
		let settled = deliveries
			.iter()
			.all(|d| !matches!(d.status, DeliveryStatus::Pending | DeliveryStatus::InFlight));
		if settled || tokio::time::Instant::now() >= deadline {
			break deliveries;
		}
		tokio::time::sleep(Duration::from_millis(200)).await;
	};

	for delivery in &deliveries {
		print_delivery(delivery);
	}
	if deliveries.iter().any(|d| !d.is_terminal()) {
		println!("unfinished deliveries are retried by `beacon-server serve`");
	}
	Ok(())
}

fn print_delivery(delivery: &Delivery) {
	println!(
		"{}  {:<28} {:<18} attempt={} status={} {}",
		delivery.id,
		delivery.event,
		delivery.status.as_str(),
		delivery.attempt,
		delivery
			.response_status
			.map(|s| s.to_string())
			.unwrap_or_else(|| "-".to_string()),
		delivery.error_message.as_deref().unwrap_or(""),
	);
}
