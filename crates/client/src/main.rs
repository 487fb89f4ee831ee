// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use seaward::config::Config;
use seaward::instance::Instance;
use seaward::storage::MemoryStore;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&config);

    // Crypto provider for the authority HTTPS client.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format == "text" {
        tracing_subscriber::fmt().compact().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // Keep a concrete handle so the snapshot can be written on exit.
    let store = match &config.state_file {
        Some(path) => Some(Arc::new(MemoryStore::with_file(path)?)),
        None => None,
    };

    let mut builder = Instance::builder(config).shutdown(shutdown.clone());
    if let Some(ref store) = store {
        builder = builder.storage(Arc::clone(store) as Arc<dyn seaward::storage::Storage>);
    }
    let instance = builder.build().await?;

    instance.bootstrap_map().await?;
    let _sluice = instance.start().await?;
    info!("seaward client running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();

    // Let the loops finish their current iteration.
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(store) = store {
        if let Err(e) = store.persist() {
            error!("state snapshot failed: {e:#}");
        }
    }
    Ok(())
}
