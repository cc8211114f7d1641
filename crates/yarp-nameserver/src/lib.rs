// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YARP Name Server
//!
//! Central registry mapping port names to network contacts, with resource
//! allocation, persistent subscriptions and connection brokering.
//!
//! # Features
//!
//! - **Triple Store** -- Registrations kept as `(record, name, value)` triples in SQLite or memory
//! - **Allocator** -- Free port numbers, generated names and multicast groups
//! - **Subscriptions** -- Standing connection wishes, joined through topics
//! - **Connection Brokering** -- Worker pool that connects and disconnects ports
//!
//! # Architecture
//!
//! ```text
//! NameServer                 (TCP, one command line per request)
//! +-- ComposedNameService    (serializes commands)
//!     +-- Subscriber         (subscriptions, topics, liveness)
//!     |   +-- ConnectManager (connect/disconnect workers)
//!     +-- NameService        (register, query, list, set, get ...)
//!         +-- TripleStore
//!         +-- Allocator
//! ```
//!
//! # Example
//!
//! ```ignore
//! use yarp_nameserver::{NameServer, ServerConfig};
//!
//! let config = ServerConfig {
//!     in_memory: true,
//!     ..Default::default()
//! };
//! let server = NameServer::from_config(config)?;
//! server.run().await?;
//! ```

pub mod allocator;
pub mod bottle;
pub mod composed;
pub mod config;
pub mod connect;
pub mod contact;
pub mod name_service;
pub mod reply;
pub mod request;
pub mod server;
pub mod store;
pub mod subscriber;

pub use allocator::{AllocError, Allocator, AllocatorConfig};
pub use bottle::{Bottle, BottleError, Value};
pub use composed::ComposedNameService;
pub use config::{ConfigError, ServerConfig};
pub use connect::{
    AdminTransport, ConnectManager, Connector, Polarity, PortTransport, TransportError,
};
pub use contact::{Contact, ParsedName};
pub use name_service::{
    EventSink, NameDelegate, NameLookup, NameService, NameServiceError, NoEvents, PortEvent,
    RemoteNameService, Response,
};
pub use reply::{Reply, ReplyFormat, SubscriptionEntry};
pub use request::Request;
pub use server::{NameServer, ServerError};
pub use store::{MemoryTripleStore, SqliteTripleStore, StoreError, Triple, TripleStore};
pub use subscriber::{Activity, Subscriber, SubscriberError};
