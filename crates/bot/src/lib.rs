//! Telegram front end for the café ordering bot.
//!
//! Wires the order engine to Telegram: inline-button actions and commands
//! are routed by [`dispatch`], messages go out through
//! [`telegram::TelegramNotifier`], and [`scheduler`] runs the expiry sweep
//! and health check next to the dispatcher.

pub mod actions;
pub mod config;
pub mod dialogue;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod telegram;

use std::sync::Arc;

use domain::{AddOnPolicy, ChatId, SizeCache, Sweeper};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use store::PostgresStore;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use actions::{PaymentMode, Services};
use config::{Config, LogFormat};
use dialogue::DeclineState;
use error::BotError;
use scheduler::Schedule;
use telegram::TelegramNotifier;

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Serves Prometheus metrics on the configured address, if any.
pub fn init_metrics(config: &Config) -> Result<(), BotError> {
    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        tracing::info!(%addr, "Serving metrics");
    }
    Ok(())
}

/// Runs the bot until interrupted.
pub async fn run(config: Config) -> Result<(), BotError> {
    init_metrics(&config)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await?;
    tracing::info!("Database migrations applied");

    let sizes = Arc::new(SizeCache::new());
    let cached = sizes.warm_from(&store).await?;
    tracing::info!(sizes = cached, "Size cache warmed");

    let bot = Bot::new(&config.bot_token);
    let payments = match &config.payment_provider_token {
        Some(token) => PaymentMode::Invoice {
            provider_token: token.clone(),
        },
        None => PaymentMode::Counter,
    };
    let policy = if config.strict_add_ons {
        AddOnPolicy::Strict
    } else {
        AddOnPolicy::Permissive
    };

    let services = Arc::new(Services::new(
        store,
        TelegramNotifier::new(bot.clone()),
        ChatId(config.manager_chat_id),
        sizes,
        policy,
        payments,
    ));

    let sweeper = Arc::new(
        Sweeper::new(Arc::clone(&services.authority), config.order_expiry)
            .with_monitor_chat(config.monitor_chat_id.map(ChatId)),
    );
    let jobs = scheduler::spawn(
        sweeper,
        Schedule::new(config.sweep_interval, config.health_interval),
    );

    tracing::info!(manager_chat = config.manager_chat_id, "Starting dispatcher");
    Dispatcher::builder(bot, dispatch::schema())
        .dependencies(dptree::deps![InMemStorage::<DeclineState>::new(), services])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    for job in jobs {
        job.abort();
    }
    tracing::info!("Bot shut down");
    Ok(())
}
