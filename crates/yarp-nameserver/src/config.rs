// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name server configuration.

use crate::allocator::AllocatorConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Name server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 10000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Lowest port number handed out by the allocator
    #[serde(default = "default_min_port_number")]
    pub min_port_number: u16,

    /// Highest port number handed out by the allocator
    #[serde(default = "default_max_port_number")]
    pub max_port_number: u16,

    /// Keep registrations and subscriptions in memory only
    #[serde(default)]
    pub in_memory: bool,

    /// Registration database file
    #[serde(default = "default_db")]
    pub port_db: PathBuf,

    /// Subscription database file
    #[serde(default = "default_db")]
    pub sub_db: PathBuf,

    /// Name server consulted when a query cannot be answered locally (host:port)
    #[serde(default)]
    pub delegate: Option<String>,

    /// Host assigned to registrations that leave it unset
    #[serde(default)]
    pub default_host: Option<String>,

    /// Number of connection worker threads
    #[serde(default = "default_connect_workers")]
    pub connect_workers: usize,

    /// Maximum command line length (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Do not echo every command to the log
    #[serde(default)]
    pub silent: bool,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    10000
}

fn default_min_port_number() -> u16 {
    10002
}

fn default_max_port_number() -> u16 {
    19999
}

fn default_db() -> PathBuf {
    PathBuf::from("yarp-ns.db")
}

fn default_connect_workers() -> usize {
    4
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            min_port_number: default_min_port_number(),
            max_port_number: default_max_port_number(),
            in_memory: false,
            port_db: default_db(),
            sub_db: default_db(),
            delegate: None,
            default_host: None,
            connect_workers: default_connect_workers(),
            max_message_size: default_max_message_size(),
            silent: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.min_port_number == 0 {
            return Err(ConfigError::InvalidValue(
                "min_port_number cannot be 0".into(),
            ));
        }
        if self.min_port_number > self.max_port_number {
            return Err(ConfigError::InvalidValue(format!(
                "min_port_number {} exceeds max_port_number {}",
                self.min_port_number, self.max_port_number
            )));
        }
        if self.connect_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "connect_workers cannot be 0".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_message_size cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Configured default host, else the address of the primary interface.
    pub fn resolved_default_host(&self) -> String {
        if let Some(host) = &self.default_host {
            return host.clone();
        }
        match local_ip_address::local_ip() {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!("No local address found ({}), using localhost", e);
                "localhost".to_string()
            }
        }
    }

    /// Allocator limits derived from this configuration.
    pub fn allocator_config(&self, default_host: &str) -> AllocatorConfig {
        AllocatorConfig {
            min_port_number: self.min_port_number,
            max_port_number: self.max_port_number,
            default_host: default_host.to_string(),
            ..AllocatorConfig::default()
        }
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
