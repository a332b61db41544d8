// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;
mod host;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use tether_config::Config;
use tether_node::transport::WsConnector;
use tether_node::{ConnectionState, GatewayNode, IdentityStore, NodeEvent, NodeOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
        Commands::ShowConfig => {
            let config = load_config(&cli)?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Identity => {
            let config = load_config(&cli)?;
            let store = IdentityStore::new(config.identity.resolved_dir());
            let identity = store
                .load_or_create()
                .with_context(|| format!("loading identity from {}", store.dir().display()))?;
            println!("device id:  {}", identity.device_id());
            println!("public key: {}", identity.public_key());
            println!("stored in:  {}", store.dir().display());
            Ok(())
        }
        Commands::ResetIdentity => {
            let config = load_config(&cli)?;
            let store = IdentityStore::new(config.identity.resolved_dir());
            let identity = store.regenerate().context("regenerating device identity")?;
            println!("new device id: {}", identity.device_id());
            eprintln!("The gateway must approve this device again before it can connect.");
            Ok(())
        }
        Commands::Run => run(load_config(&cli)?).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = tether_config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.gateway {
        config.gateway.url = url.clone();
    }
    Ok(config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let store = IdentityStore::new(config.identity.resolved_dir());
    let dispatcher = Arc::new(host::headless_dispatcher(&config.node));
    let (node, handle) = GatewayNode::new(
        NodeOptions::from_config(&config),
        store,
        Arc::new(WsConnector),
        dispatcher,
    )
    .context("initialising gateway node")?;

    eprintln!("tether {} ({})", env!("CARGO_PKG_VERSION"), handle.device_id());
    eprintln!("Gateway: {}", config.gateway.url);

    let engine = tokio::spawn(node.run());
    let mut events = handle.subscribe();
    handle.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, disconnecting");
                break;
            }
            ev = events.recv() => match ev {
                Ok(NodeEvent::StateChanged(ConnectionState::Error(reason))) => {
                    warn!(%reason, "gateway connection failed");
                }
                Ok(NodeEvent::Connected { protocol, tick_interval_ms }) => {
                    info!(protocol, tick_interval_ms, "connected to gateway");
                }
                Ok(NodeEvent::CommandCompleted(record)) => {
                    info!(
                        command = %record.command,
                        ok = record.succeeded,
                        duration_ms = record.duration_ms,
                        "command served"
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await.ok();
    engine.await.context("node task panicked")?;
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
