use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use funding_gateway::address::Base58Alphabet;
use funding_gateway::broker::{connection::BrokerContext, reply};
use funding_gateway::config::GatewayConfig;
use funding_gateway::dispatch::correlation::CorrelationRegistry;
use funding_gateway::dispatch::dispatcher::RequestDispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenv::dotenv().ok();

    let config = GatewayConfig::load().context("failed to load gateway configuration")?;

    // No degraded mode: a broker we cannot reach at startup is fatal.
    let broker = BrokerContext::connect(&config)
        .await
        .context("failed to establish broker connection")?;

    let registry = CorrelationRegistry::new();
    reply::attach(&broker.channel, &broker.reply_queue, registry.clone())
        .await
        .context("failed to attach reply consumer")?;

    let dispatcher = RequestDispatcher::new(
        broker.channel.clone(),
        broker.reply_queue.clone(),
        registry,
        Arc::new(Base58Alphabet),
        &config,
    );

    // The HTTP layer plugs in here and calls dispatcher.submit() per
    // incoming funding request.
    info!("gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    let dropped = dispatcher.shutdown("gateway shutting down");
    if dropped > 0 {
        info!(dropped, "failed pending requests during shutdown");
    }

    broker.close().await.context("failed to close broker connection")?;

    Ok(())
}
