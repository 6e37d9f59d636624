use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whistle::config;
use whistle::store::{WhitelistStore, create_storage_backend, spawn_autosave};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whistle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let app_config = config::load_config_with_fallback().context("loading configuration")?;

    let storage = create_storage_backend(&app_config.storage);
    let store = Arc::new(
        WhitelistStore::open(storage)
            .await
            .context("loading the whitelist store")?,
    );

    let autosave = if app_config.autosave.enabled {
        Some(spawn_autosave(store.clone(), app_config.autosave.interval()))
    } else {
        tracing::info!("Autosave disabled");
        None
    };

    tracing::info!("Whitelist store ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    tracing::info!("Shutting down");
    if let Some(handle) = autosave {
        handle.stop().await;
    }
    store.save().await.context("saving the whitelist on shutdown")?;
    tracing::info!("Whitelist saved, bye");

    Ok(())
}
