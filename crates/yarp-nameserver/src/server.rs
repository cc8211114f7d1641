// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP front end.

use crate::allocator::Allocator;
use crate::composed::ComposedNameService;
use crate::config::{ConfigError, ServerConfig};
use crate::connect::{AdminTransport, ConnectManager, TransportError};
use crate::contact::Contact;
use crate::name_service::{NameService, RemoteNameService};
use crate::reply::{Reply, ReplyFormat};
use crate::store::{SqliteTripleStore, StoreError, TripleStore};
use crate::subscriber::{Subscriber, SubscriberError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub mod connection;

pub use connection::{ClientConnection, ConnectionError};

/// Name server: accepts clients and feeds their commands to the service.
#[derive(Clone)]
pub struct NameServer {
    config: Arc<ServerConfig>,
    service: Arc<ComposedNameService>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl NameServer {
    /// Create a server around an existing service.
    pub fn new(config: ServerConfig, service: Arc<ComposedNameService>) -> Result<Self, ServerError> {
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            service,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open the stores and wire the service as configured.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let default_host = config.resolved_default_host();

        let store: Box<dyn TripleStore> = if config.in_memory {
            Box::new(SqliteTripleStore::open_in_memory()?)
        } else {
            Box::new(SqliteTripleStore::open(&config.port_db)?)
        };

        let mut names = NameService::new(
            store,
            Allocator::new(config.allocator_config(&default_host)),
        )
        .with_server_contact(Contact::new("/root", "tcp", default_host, config.port));
        if let Some(address) = &config.delegate {
            info!("Delegating unknown names to {}", address);
            names = names.with_delegate(Arc::new(RemoteNameService::new(address.clone())));
        }
        let names = Arc::new(names);

        let transport = Arc::new(AdminTransport::new(names.clone()));
        let manager = Arc::new(ConnectManager::new(transport, config.connect_workers)?);

        let subscriber = if config.in_memory {
            Subscriber::open_in_memory(manager, names.clone())?
        } else {
            Subscriber::open(&config.sub_db, manager, names.clone())?
        };

        let service =
            ComposedNameService::new(names, Arc::new(subscriber)).silent(config.silent);
        Self::new(config, Arc::new(service))
    }

    pub fn service(&self) -> &Arc<ComposedNameService> {
        &self.service
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        self.run_on(listener).await
    }

    /// Serve clients accepted on `listener` until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        match listener.local_addr() {
            Ok(addr) => info!("Name server listening on {}", addr),
            Err(e) => warn!("Name server listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("New connection from {}", peer_addr);

                            let service = self.service.clone();
                            let max_message_size = self.config.max_message_size;
                            let shutdown = self.shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    peer_addr,
                                    service,
                                    max_message_size,
                                    shutdown,
                                ).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handle a client connection.
    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        service: Arc<ComposedNameService>,
        max_message_size: usize,
        shutdown: Arc<Notify>,
    ) -> Result<(), ServerError> {
        let mut conn = ClientConnection::new(stream, peer_addr, max_message_size);
        let remote_host = peer_addr.ip().to_string();

        loop {
            tokio::select! {
                result = conn.read_line() => {
                    match result {
                        Ok(Some(line)) => {
                            let service = service.clone();
                            let host = remote_host.clone();
                            // Commands may block on SQLite and on the service lock
                            let reply = tokio::task::spawn_blocking(move || {
                                service.apply_line(&line, Some(&host))
                            })
                            .await?;
                            conn.send_line(&reply).await?;
                        }
                        Ok(None) => {
                            debug!("Connection closed: {}", peer_addr);
                            break;
                        }
                        Err(ConnectionError::Protocol(msg)) => {
                            warn!("Bad line from {}: {}", peer_addr, msg);
                            let reply = Reply::Failure(msg).render(ReplyFormat::Legacy);
                            if let Err(e) = conn.send_line(&reply.to_string()).await {
                                debug!("Cannot report error to {}: {}", peer_addr, e);
                            }
                            break;
                        }
                        Err(e) => {
                            warn!("Read error from {}: {}", peer_addr, e);
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    debug!("Connection handler shutting down: {}", peer_addr);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Shutdown the server.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Check if server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Subscriber error: {0}")]
    Subscriber(#[from] SubscriberError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::{timeout, Duration};

    fn test_config() -> ServerConfig {
        ServerConfig {
            in_memory: true,
            default_host: Some("127.0.0.1".to_string()),
            connect_workers: 1,
            silent: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config() {
        let config = ServerConfig {
            connect_workers: 0,
            ..test_config()
        };
        assert!(matches!(
            NameServer::from_config(config),
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_serve_commands() {
        let server = NameServer::from_config(test_config()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run_on(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"register /alpha tcp ... 10050\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        // host "..." resolves to the requesting peer
        assert_eq!(
            reply,
            "old (registration name /alpha ip 127.0.0.1 port 10050 type tcp)"
        );

        write.write_all(b"bot query /alpha\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with("port (name /alpha)"));

        write.write_all(b"query (unbalanced\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with("old (error"));

        assert!(server.is_running());
        server.shutdown().await;
        let result = timeout(Duration::from_secs(5), handle).await.unwrap();
        assert!(result.unwrap().is_ok());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_gets_error_reply() {
        let server = NameServer::from_config(test_config()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run_on(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"query /\xff\xfe\n").await.unwrap();
        let reply = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(reply.starts_with("old (error"));
        assert!(reply.contains("UTF-8"));

        // connection is closed after the error
        let next = timeout(Duration::from_secs(5), lines.next_line()).await.unwrap();
        assert!(matches!(next, Ok(None)));

        server.shutdown().await;
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_already_running() {
        let server = NameServer::from_config(test_config()).unwrap();
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run_on(first).await });

        while !server.is_running() {
            tokio::task::yield_now().await;
        }
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.run_on(second).await,
            Err(ServerError::AlreadyRunning)
        ));

        server.shutdown().await;
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();
    }
}
