// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource allocation on top of the triple store.
//!
//! - Port names: `/tmp/port/<n>` for anonymous registrations
//! - Socket numbers: first free number in `[min_port_number, max_port_number]`
//! - Multicast groups: `224.1.x.y`, handed out from a rotating cursor
//!
//! Socket usage is derived from the `socket` attributes of live records, so
//! removing a registration frees its number. Multicast groups are reserved
//! with explicit top-level `alloc:mcast` triples.

use crate::contact::{is_auto, Contact};
use crate::store::{StoreError, Triple, TripleStore, WILDCARD};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

const TMP_PREFIX: &str = "/tmp/port/";
const ALLOC_NS: &str = "alloc";
const MCAST_KEY: &str = "mcast";
const MCAST_ROW: u32 = 254;

/// Allocation errors.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("No free port number in range {min}..={max}")]
    PortsExhausted { min: u16, max: u16 },

    #[error("Multicast address space exhausted ({0} groups)")]
    MulticastExhausted(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Allocator limits.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub min_port_number: u16,
    pub max_port_number: u16,
    /// Host assigned when a registration leaves it unset
    pub default_host: String,
    /// Number of multicast groups available under 224.1.0.0/16
    pub mcast_group_limit: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            min_port_number: 10002,
            max_port_number: 19999,
            default_host: "localhost".to_string(),
            mcast_group_limit: MCAST_ROW * MCAST_ROW,
        }
    }
}

/// Completes partially specified contacts.
#[derive(Debug)]
pub struct Allocator {
    config: AllocatorConfig,
    regid: u64,
    mcast_cursor: u32,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            config,
            regid: 1,
            mcast_cursor: 0,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Give anonymous (`...`) or `=`-prefixed names a unique generated name.
    pub fn complete_port_name(
        &mut self,
        store: &dyn TripleStore,
        contact: &Contact,
    ) -> Result<Contact, AllocError> {
        let name = contact.name.as_str();
        let anonymous = is_auto(name);
        if !anonymous && !name.starts_with('=') {
            return Ok(contact.clone());
        }

        let generated = loop {
            let candidate = format!("{}{}", TMP_PREFIX, self.regid);
            self.regid += 1;
            let full = if anonymous {
                candidate
            } else {
                format!("{}{}", candidate, name)
            };
            if store
                .find(&Triple::name_value("port", full.as_str()), None)?
                .is_none()
            {
                break full;
            }
        };

        debug!("Generated port name {}", generated);
        Ok(Contact {
            name: generated,
            ..contact.clone()
        })
    }

    /// Fill in host, socket number and (for multicast) group address.
    pub fn complete_socket(
        &mut self,
        store: &mut dyn TripleStore,
        contact: &Contact,
    ) -> Result<Contact, AllocError> {
        let mut c = contact.clone();

        if c.is_mcast() && is_auto(&c.host) {
            c.host = self.allocate_group(store)?;
        }
        if is_auto(&c.host) {
            c.host = self.config.default_host.clone();
        }
        if c.port == 0 {
            c.port = self.allocate_port(store)?;
        }

        Ok(c)
    }

    /// Release resources held by `contact`. Best-effort; always succeeds
    /// for resources that were never centrally allocated.
    pub fn free_port_resources(
        &mut self,
        store: &mut dyn TripleStore,
        contact: &Contact,
    ) -> Result<bool, AllocError> {
        if contact.is_mcast() && !is_auto(&contact.host) {
            debug!("Releasing multicast group {}", contact.host);
            store.remove_query(
                &Triple::ns_name_value(ALLOC_NS, MCAST_KEY, contact.host.as_str()),
                None,
            )?;
        }
        Ok(true)
    }

    /// Socket numbers currently recorded by registrations.
    fn used_ports(store: &dyn TripleStore) -> Result<HashSet<u16>, AllocError> {
        let mut used = HashSet::new();
        for port in store.query(&Triple::name_value("port", WILDCARD), None)? {
            let Some(rid) = store.find(&port, None)? else {
                continue;
            };
            for socket in store.query(&Triple::name_value("socket", WILDCARD), Some(rid))? {
                if let Ok(n) = socket.value.parse::<u16>() {
                    used.insert(n);
                }
            }
        }
        Ok(used)
    }

    /// First-fit ascending scan of the configured range.
    fn allocate_port(&mut self, store: &dyn TripleStore) -> Result<u16, AllocError> {
        let used = Self::used_ports(store)?;
        let (min, max) = (self.config.min_port_number, self.config.max_port_number);
        let port = (min..=max)
            .find(|p| !used.contains(p))
            .ok_or(AllocError::PortsExhausted { min, max })?;
        debug!("Allocated port number {}", port);
        Ok(port)
    }

    fn group_address(slot: u32) -> String {
        format!("224.1.{}.{}", 1 + slot / MCAST_ROW, 1 + slot % MCAST_ROW)
    }

    fn allocate_group(&mut self, store: &mut dyn TripleStore) -> Result<String, AllocError> {
        let limit = self.config.mcast_group_limit.clamp(1, MCAST_ROW * MCAST_ROW);
        let reserved: HashSet<String> = store
            .query(&Triple::ns_name_value(ALLOC_NS, MCAST_KEY, WILDCARD), None)?
            .into_iter()
            .map(|t| t.value)
            .collect();

        for offset in 0..limit {
            let slot = (self.mcast_cursor + offset) % limit;
            let addr = Self::group_address(slot);
            if !reserved.contains(&addr) {
                store.insert(
                    &Triple::ns_name_value(ALLOC_NS, MCAST_KEY, addr.as_str()),
                    None,
                )?;
                self.mcast_cursor = (slot + 1) % limit;
                debug!("Allocated multicast group {}", addr);
                return Ok(addr);
            }
        }

        Err(AllocError::MulticastExhausted(limit))
    }
}
