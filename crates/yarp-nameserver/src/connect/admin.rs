// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Port administration over TCP.
//!
//! The source port is resolved through the name service and asked to
//! manage its own outputs with one-line commands:
//!
//! ```text
//! list out     -> names of current destinations
//! add <dest>   -> ok | fail ...
//! del <dest>   -> ok | fail ...
//! ```

use super::{send_line, PortTransport, TransportError};
use crate::bottle::{Bottle, Value};
use crate::name_service::NameLookup;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`PortTransport`] that talks to the source port's admin interface.
pub struct AdminTransport {
    lookup: Arc<dyn NameLookup>,
    timeout: Duration,
}

impl AdminTransport {
    pub fn new(lookup: Arc<dyn NameLookup>) -> Self {
        Self {
            lookup,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn admin(&self, port: &str, line: &str) -> Result<Bottle, TransportError> {
        let contact = self
            .lookup
            .lookup(port)
            .ok_or_else(|| TransportError::Resolve(port.to_string()))?;
        let address = contact.socket_address();
        debug!("{} <- {}", address, line);
        let reply = send_line(&address, line, self.timeout)?;
        Ok(Bottle::from_text(&reply)?)
    }

    fn expect_ok(&self, port: &str, line: &str) -> Result<(), TransportError> {
        let reply = self.admin(port, line)?;
        match reply.get(0).and_then(Value::as_str) {
            Some("fail") | Some("error") => Err(TransportError::Rejected {
                peer: port.to_string(),
                reply: reply.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl PortTransport for AdminTransport {
    fn is_connected(&self, src: &str, dest: &str) -> Result<bool, TransportError> {
        let reply = self.admin(src, "list out")?;
        let found = reply.iter().any(|v| match v {
            Value::List(inner) => inner.text_at(0) == dest,
            other => other.text() == dest,
        });
        Ok(found)
    }

    fn connect(&self, src: &str, dest: &str) -> Result<(), TransportError> {
        self.expect_ok(src, &format!("add {}", dest))
    }

    fn disconnect(&self, src: &str, dest: &str) -> Result<(), TransportError> {
        self.expect_ok(src, &format!("del {}", dest))
    }
}
