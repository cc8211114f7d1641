// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YARP Name Server
//!
//! # Usage
//!
//! ```bash
//! # Start server on default port (10000), registrations in ./yarp-ns.db
//! yarp-nameserver
//!
//! # Volatile registry on a custom port
//! yarp-nameserver --port 10010 --in-memory
//!
//! # Forward unknown names to another name server
//! yarp-nameserver --delegate 10.0.0.9:10000
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use yarp_nameserver::{NameServer, ServerConfig};

/// YARP Name Server - port registry and connection broker
#[derive(Parser, Debug)]
#[command(name = "yarp-nameserver")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "10000")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lowest port number handed out to registrations
    #[arg(long, default_value = "10002")]
    min_port: u16,

    /// Highest port number handed out to registrations
    #[arg(long, default_value = "19999")]
    max_port: u16,

    /// Keep everything in memory
    #[arg(long, default_value = "false")]
    in_memory: bool,

    /// Registration database
    #[arg(long, default_value = "yarp-ns.db")]
    port_db: PathBuf,

    /// Subscription database
    #[arg(long, default_value = "yarp-ns.db")]
    sub_db: PathBuf,

    /// Name server to consult for unknown names (host:port)
    #[arg(long)]
    delegate: Option<String>,

    /// Host given to registrations that leave it unset
    #[arg(long)]
    default_host: Option<String>,

    /// Connection worker threads
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not log every command
    #[arg(long, default_value = "false")]
    silent: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            min_port_number: args.min_port,
            max_port_number: args.max_port,
            in_memory: args.in_memory,
            port_db: args.port_db,
            sub_db: args.sub_db,
            delegate: args.delegate,
            default_host: args.default_host,
            connect_workers: args.workers,
            silent: args.silent,
            ..Default::default()
        }
    };

    let storage = if config.in_memory {
        "memory".to_string()
    } else {
        config.port_db.display().to_string()
    };

    info!("+----------------------------------------------------+");
    info!(
        "|       YARP Name Server v{}                      |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:     {:38} |", format!("{}:{}", config.bind_address, config.port));
    info!(
        "|  Ports:    {:38} |",
        format!("{}-{}", config.min_port_number, config.max_port_number)
    );
    info!("|  Storage:  {:38} |", storage);
    info!(
        "|  Delegate: {:38} |",
        config.delegate.as_deref().unwrap_or("none")
    );
    info!("+----------------------------------------------------+");

    // Startup store failures are fatal
    let server = NameServer::from_config(config).context("cannot start name server")?;

    // Handle shutdown signals
    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        server_handle.shutdown().await;
    });

    // Run server
    server.run().await?;

    info!("Name server stopped");
    Ok(())
}
