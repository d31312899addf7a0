mod bootstrap;

use anyhow::Result;
use parley_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{bootstrap_with_config, Platform};

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let platform = Platform::offline(&config);
    let app = bootstrap_with_config(config, platform).await?;

    tracing::info!(
        event_name = "system.server.started",
        bot_handle = %app.config.bot.handle,
        triggers = app.registry.len(),
        allowed_chats = app.config.bot.allowed_chat_ids.len(),
        "parley-server started"
    );

    tokio::select! {
        () = app.runner.start(&app.shutdown) => {
            tracing::info!(event_name = "system.server.gateway_stopped", "gateway runner returned");
        }
        result = wait_for_shutdown() => result?,
    }

    tracing::info!(event_name = "system.server.stopping", "parley-server stopping");
    app.stop().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
