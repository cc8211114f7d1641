// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote name server used as a query fallback.

use super::NameDelegate;
use crate::bottle::Bottle;
use crate::connect::{send_line, TransportError};
use crate::contact::Contact;
use crate::reply::contact_from_structured;
use std::time::Duration;
use tracing::{debug, warn};

/// Forwards `bot query <name>` to another name server.
#[derive(Debug, Clone)]
pub struct RemoteNameService {
    address: String,
    timeout: Duration,
}

impl RemoteNameService {
    /// `address` is `host:port` of the remote server.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a raw command and decode the reply line.
    pub fn request(&self, command: &str) -> Result<Bottle, TransportError> {
        let reply = send_line(&self.address, command, self.timeout)?;
        Ok(Bottle::from_text(&reply)?)
    }
}

impl NameDelegate for RemoteNameService {
    fn query_name(&self, name: &str) -> Option<Contact> {
        match self.request(&format!("bot query {}", name)) {
            Ok(reply) => {
                let contact = contact_from_structured(&reply);
                debug!("Delegate {} resolved {} to {:?}", self.address, name, contact);
                contact
            }
            Err(e) => {
                warn!("Delegate {} unreachable: {}", self.address, e);
                None
            }
        }
    }
}
