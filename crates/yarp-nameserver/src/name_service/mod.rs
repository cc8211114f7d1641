// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name service command interpreter.
//!
//! Registrations live in the triple store as one top-level `port` triple
//! per name plus record-scoped attributes:
//!
//! ```text
//! (rid=NULL) port   = /camera        <- record id R
//! (rid=R)    carrier= tcp
//! (rid=R)    host   = 10.0.0.4
//! (rid=R)    socket = 10002
//! (rid=R)    type   = *
//! (rid=R)    ips    = 10.0.0.4 192.168.1.7   (optional, set by clients)
//! (rid=R)    owns   = /camera/aux            (optional)
//! ```
//!
//! Every command runs inside a store transaction. Port events are handed
//! to the [`EventSink`] with the registry unlocked: `del` before the record
//! is removed, `add` after it is committed.

pub mod delegate;

pub use delegate::RemoteNameService;

use crate::allocator::{AllocError, Allocator};
use crate::bottle::{Bottle, Value};
use crate::contact::{canonical_name, is_auto, Contact, ParsedName, MCAST_CARRIER, TOPIC_CARRIER};
use crate::reply::{Reply, ReplyFormat};
use crate::request::Request;
use crate::store::{RecordId, StoreError, Triple, TripleStore, WILDCARD};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

const DEFAULT_SOCKET: u16 = 10000;
const DEFAULT_CARRIER: &str = "tcp";
const DEFAULT_HOST: &str = "localhost";

const HELP: &[&str] = &[
    "+ help",
    "+ list [<prefix>]",
    "+ register <port> [<carrier> [<host> [<socket> [<type>]]]]",
    "+ unregister <port>",
    "+ query <port>",
    "+ set <port> <key> <value> ...",
    "+ get <port> <key>",
    "+ check <port> <key> <value>",
    "+ route <port1> <port2>",
    "+ runners",
    "+ gc",
    "+ subscribe [<src> [<dest> [<mode>]]]",
    "+ unsubscribe <src> <dest>",
    "+ announce <port> [<activity>]",
    "+ topic [<name> [<structure>]]",
    "+ untopic <name>",
    "+ type <family> <structure> [<value>]",
];

/// Name service errors.
#[derive(Debug, Error)]
pub enum NameServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Allocation failed: {0}")]
    Alloc(#[from] AllocError),

    #[error("{0}")]
    Protocol(String),
}

/// Registration change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    Add(String),
    Del(String),
}

impl PortEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Add(n) | Self::Del(n) => n,
        }
    }

    /// `add <name>` / `del <name>`
    pub fn to_bottle(&self) -> Bottle {
        let mut b = Bottle::new();
        match self {
            Self::Add(n) => b.add_str("add").add_str(n.as_str()),
            Self::Del(n) => b.add_str("del").add_str(n.as_str()),
        };
        b
    }
}

/// Receiver of port events.
pub trait EventSink: Send + Sync {
    fn port_event(&self, event: &PortEvent);
}

/// Sink that drops every event.
pub struct NoEvents;

impl EventSink for NoEvents {
    fn port_event(&self, _event: &PortEvent) {}
}

/// Name resolution as seen by other components.
pub trait NameLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Contact>;
}

/// Fallback resolver consulted when a name is not registered locally.
pub trait NameDelegate: Send + Sync {
    fn query_name(&self, name: &str) -> Option<Contact>;
}

/// Outcome of one command.
#[derive(Debug, Clone)]
pub struct Response {
    pub reply: Reply,
    pub format: ReplyFormat,
    /// Events delivered while executing the command, in order.
    pub events: Vec<PortEvent>,
}

impl Response {
    pub fn new(reply: Reply, format: ReplyFormat) -> Self {
        Self {
            reply,
            format,
            events: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        !self.reply.is_failure()
    }

    pub fn to_bottle(&self) -> Bottle {
        self.reply.render(self.format)
    }
}

/// Store plus allocator, guarded together.
struct Registry {
    store: Box<dyn TripleStore>,
    alloc: Allocator,
}

impl Registry {
    fn record(&self, name: &str) -> Result<Option<RecordId>, StoreError> {
        self.store.find(&Triple::name_value("port", name), None)
    }

    fn values(&self, rid: RecordId, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .query(&Triple::name_value(key, WILDCARD), Some(rid))?
            .into_iter()
            .map(|t| t.value)
            .collect())
    }

    fn port_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .query(&Triple::name_value("port", WILDCARD), None)?
            .into_iter()
            .map(|t| t.value)
            .collect())
    }

    /// Resolve a registered name; `network_choice` prefers a matching `ips` entry.
    fn contact(
        &self,
        name: &str,
        network_choice: Option<&str>,
    ) -> Result<Option<Contact>, StoreError> {
        let Some(rid) = self.record(name)? else {
            return Ok(None);
        };

        let chosen = match network_choice {
            Some(choice) => self
                .values(rid, "ips")?
                .into_iter()
                .find(|ip| ip.starts_with(choice)),
            None => None,
        };
        let host = match chosen {
            Some(ip) => ip,
            None => self
                .values(rid, "host")?
                .into_iter()
                .next()
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        };
        let port = self
            .values(rid, "socket")?
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SOCKET);
        let carrier = self
            .values(rid, "carrier")?
            .into_iter()
            .next()
            .unwrap_or_else(|| DEFAULT_CARRIER.to_string());

        let mut c = Contact::new(name, carrier, host, port);
        c.type_name = self
            .values(rid, "type")?
            .into_iter()
            .find(|t| t != WILDCARD);
        Ok(Some(c))
    }

    /// Release and delete every record collected by [`Self::collect_tree`].
    fn remove_tree(&mut self, doomed: &[(String, Option<Contact>)]) -> Result<(), AllocError> {
        for (port, contact) in doomed {
            if let Some(c) = contact {
                self.alloc.free_port_resources(self.store.as_mut(), c)?;
            }
            if let Some(rid) = self.record(port)? {
                self.store.remove_query(&Triple::any(), Some(rid))?;
            }
            self.store
                .remove_query(&Triple::name_value("port", port.as_str()), None)?;
            debug!("Unregistered {}", port);
        }
        Ok(())
    }

    /// `name` followed by everything it owns, depth first.
    fn collect_tree(
        &self,
        name: &str,
        seen: &mut HashSet<String>,
        out: &mut Vec<(String, Option<Contact>)>,
    ) -> Result<(), StoreError> {
        if !seen.insert(name.to_string()) {
            return Ok(());
        }
        out.push((name.to_string(), self.contact(name, None)?));
        if let Some(rid) = self.record(name)? {
            for owned in self.values(rid, "owns")? {
                self.collect_tree(&owned, seen, out)?;
            }
        }
        Ok(())
    }
}

/// Command interpreter over a triple store.
pub struct NameService {
    registry: Mutex<Registry>,
    server_contact: Contact,
    delegate: Option<Arc<dyn NameDelegate>>,
}

impl NameService {
    pub fn new(store: Box<dyn TripleStore>, alloc: Allocator) -> Self {
        let server_contact = Contact::new(
            "/root",
            DEFAULT_CARRIER,
            alloc.config().default_host.clone(),
            DEFAULT_SOCKET,
        );
        Self {
            registry: Mutex::new(Registry { store, alloc }),
            server_contact,
            delegate: None,
        }
    }

    /// Contact of the server itself, used for topic registrations.
    pub fn with_server_contact(mut self, contact: Contact) -> Self {
        self.server_contact = contact;
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn NameDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn server_contact(&self) -> &Contact {
        &self.server_contact
    }

    /// Execute one command. `remote_host` is the requesting peer, if known.
    pub fn apply(&self, req: &Request, remote_host: Option<&str>, sink: &dyn EventSink) -> Response {
        let mut events = Vec::new();
        let result = match req.verb.as_str() {
            "register" => self.cmd_register(req, remote_host, sink, &mut events),
            "unregister" => self.cmd_unregister(req, sink, &mut events),
            "query" => self.cmd_query(req),
            "list" => self.cmd_list(req),
            "runners" => self.cmd_runners(),
            "set" => self.cmd_set(req),
            "get" => self.cmd_get(req),
            "check" => self.cmd_check(req),
            "route" => self.cmd_route(req),
            "gc" => Ok(Reply::Message("garbage collection done.".to_string())),
            "help" => Ok(Reply::Help(HELP.iter().map(|l| l.to_string()).collect())),
            other => Ok(Reply::NotUnderstood(format!(
                "command not understood: {}",
                other
            ))),
        };

        let reply = result.unwrap_or_else(|e| {
            match &e {
                NameServiceError::Protocol(msg) => warn!("{}: {}", req.verb, msg),
                other => error!("{} failed: {}", req.verb, other),
            }
            Reply::Failure(e.to_string())
        });

        Response {
            reply,
            format: req.format,
            events,
        }
    }

    /// Resolve `name` locally, then through the delegate.
    pub fn query(&self, name: &str) -> Result<Option<Contact>, NameServiceError> {
        let parsed = ParsedName::parse(name);
        let local = self.transact(|reg| {
            Ok(reg.contact(&parsed.port_name, parsed.network_choice.as_deref())?)
        })?;
        if local.is_some() {
            return Ok(local);
        }
        Ok(self
            .delegate
            .as_ref()
            .and_then(|d| d.query_name(&parsed.port_name)))
    }

    /// Run `f` inside a store transaction, rolling back on error.
    fn transact<T>(
        &self,
        f: impl FnOnce(&mut Registry) -> Result<T, NameServiceError>,
    ) -> Result<T, NameServiceError> {
        let mut reg = self.registry.lock();
        reg.store.begin()?;
        match f(&mut *reg) {
            Ok(value) => {
                reg.store.end()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = reg.store.abort() {
                    error!("Rollback failed: {}", abort);
                }
                Err(e)
            }
        }
    }

    fn cmd_register(
        &self,
        req: &Request,
        remote_host: Option<&str>,
        sink: &dyn EventSink,
        events: &mut Vec<PortEvent>,
    ) -> Result<Reply, NameServiceError> {
        let raw = req.arg(0);
        if raw.is_empty() {
            return Err(NameServiceError::Protocol(
                "register needs a port name".to_string(),
            ));
        }
        let name = canonical_name(&raw);

        let carrier = match req.arg(1) {
            c if is_auto(&c) => DEFAULT_CARRIER.to_string(),
            c => c,
        };
        let mut host = req.arg(2);
        let mut port = socket_arg(req.args.get(3))?;
        let type_name = Some(req.arg(4)).filter(|t| !is_auto(t));

        if carrier == TOPIC_CARRIER {
            if is_auto(&host) {
                host = self.server_contact.host.clone();
            }
            if port == 0 {
                port = self.server_contact.port;
            }
        } else if is_auto(&host) {
            if let Some(peer) = remote_host.filter(|_| carrier != MCAST_CARRIER) {
                host = peer.to_string();
            }
        }

        // Replacing an existing registration and inserting the new one
        // commit together; a failed allocation leaves the old one intact.
        let (replaced, registered) = self.transact(|reg| {
            let mut replaced = Vec::new();
            if reg.record(&name)?.is_some() {
                debug!("{} already registered, replacing", name);
                reg.collect_tree(&name, &mut HashSet::new(), &mut replaced)?;
                reg.remove_tree(&replaced)?;
            }

            let mut candidate = Contact::new(name.as_str(), carrier, host, port);
            candidate.type_name = type_name;

            let named = reg.alloc.complete_port_name(reg.store.as_ref(), &candidate)?;
            let c = reg.alloc.complete_socket(reg.store.as_mut(), &named)?;

            let port_triple = Triple::name_value("port", c.name.as_str());
            reg.store.insert(&port_triple, None)?;
            let rid = reg.store.find(&port_triple, None)?.ok_or_else(|| {
                StoreError::Transaction(format!("record for {} vanished", c.name))
            })?;
            reg.store
                .insert(&Triple::name_value("carrier", c.carrier.as_str()), Some(rid))?;
            reg.store
                .insert(&Triple::name_value("host", c.host.as_str()), Some(rid))?;
            reg.store
                .insert(&Triple::name_value("socket", c.port.to_string()), Some(rid))?;
            reg.store.insert(
                &Triple::name_value("type", c.type_name.as_deref().unwrap_or(WILDCARD)),
                Some(rid),
            )?;
            Ok((replaced, c))
        })?;

        announce_removed(&replaced, sink, events);

        debug!(
            "Registered {} at {}://{}",
            registered.name,
            registered.carrier,
            registered.socket_address()
        );

        if !registered.is_mcast() {
            let event = PortEvent::Add(registered.name.clone());
            sink.port_event(&event);
            events.push(event);
        }

        let contact = self.transact(|reg| Ok(reg.contact(&registered.name, None)?))?;
        Ok(Reply::Registration {
            name: registered.name,
            contact,
        })
    }

    fn cmd_unregister(
        &self,
        req: &Request,
        sink: &dyn EventSink,
        events: &mut Vec<PortEvent>,
    ) -> Result<Reply, NameServiceError> {
        let name = required(req, 0, "unregister needs a port name")?;
        self.unregister_tree(&name, sink, events)?;
        let contact = self.transact(|reg| Ok(reg.contact(&name, None)?))?;
        Ok(Reply::Registration { name, contact })
    }

    /// Announce and remove `name` and every record it owns.
    fn unregister_tree(
        &self,
        name: &str,
        sink: &dyn EventSink,
        events: &mut Vec<PortEvent>,
    ) -> Result<(), NameServiceError> {
        let doomed = self.transact(|reg| {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            reg.collect_tree(name, &mut seen, &mut out)?;
            Ok(out)
        })?;

        announce_removed(&doomed, sink, events);
        self.transact(|reg| Ok(reg.remove_tree(&doomed)?))
    }

    fn cmd_query(&self, req: &Request) -> Result<Reply, NameServiceError> {
        let raw = required(req, 0, "query needs a port name")?;
        let contact = self.query(&raw)?;
        Ok(Reply::Registration {
            name: canonical_name(&raw),
            contact,
        })
    }

    fn cmd_list(&self, req: &Request) -> Result<Reply, NameServiceError> {
        let prefix = req.arg(0);
        self.transact(|reg| {
            let mut out = Vec::new();
            for name in reg.port_names()? {
                if !prefix_matches(&prefix, &name) {
                    continue;
                }
                if let Some(c) = reg.contact(&name, None)? {
                    out.push(c);
                }
            }
            Ok(Reply::Ports(out))
        })
    }

    fn cmd_runners(&self) -> Result<Reply, NameServiceError> {
        self.transact(|reg| {
            let mut out = Vec::new();
            for name in reg.port_names()? {
                let Some(rid) = reg.record(&name)? else {
                    continue;
                };
                if !reg.values(rid, "yarprun")?.iter().any(|v| v == "true") {
                    continue;
                }
                if let Some(c) = reg.contact(&name, None)? {
                    out.push(c);
                }
            }
            Ok(Reply::Ports(out))
        })
    }

    fn cmd_set(&self, req: &Request) -> Result<Reply, NameServiceError> {
        let port = canonical_name(&required(req, 0, "set needs a port name")?);
        let key = required(req, 1, "set needs a key")?;
        let values: Vec<String> = req.args.iter().skip(2).map(Value::text).collect();

        self.transact(|reg| {
            let Some(rid) = reg.record(&port)? else {
                return Ok(unknown_port(&port));
            };
            reg.store
                .remove_query(&Triple::name_value(key.as_str(), WILDCARD), Some(rid))?;
            for v in &values {
                reg.store
                    .insert(&Triple::name_value(key.as_str(), v.as_str()), Some(rid))?;
            }
            Ok(Reply::Property {
                port: port.clone(),
                key: key.clone(),
                values: values.clone(),
            })
        })
    }

    fn cmd_get(&self, req: &Request) -> Result<Reply, NameServiceError> {
        let port = canonical_name(&required(req, 0, "get needs a port name")?);
        let key = required(req, 1, "get needs a key")?;
        self.transact(|reg| {
            let Some(rid) = reg.record(&port)? else {
                return Ok(unknown_port(&port));
            };
            Ok(Reply::Property {
                values: reg.values(rid, &key)?,
                port: port.clone(),
                key: key.clone(),
            })
        })
    }

    fn cmd_check(&self, req: &Request) -> Result<Reply, NameServiceError> {
        let port = canonical_name(&required(req, 0, "check needs a port name")?);
        let key = required(req, 1, "check needs a key")?;
        let value = required(req, 2, "check needs a value")?;
        self.transact(|reg| {
            let Some(rid) = reg.record(&port)? else {
                return Ok(unknown_port(&port));
            };
            let present = reg.values(rid, &key)?.iter().any(|v| *v == value);
            Ok(Reply::Check {
                port: port.clone(),
                key: key.clone(),
                value: value.clone(),
                present,
            })
        })
    }

    fn cmd_route(&self, req: &Request) -> Result<Reply, NameServiceError> {
        let from = required(req, 0, "route needs two port names")?;
        let to = required(req, 1, "route needs two port names")?;
        let route = format!("tcp:/{}", to);
        Ok(Reply::Route { from, to, route })
    }
}

impl NameLookup for NameService {
    fn lookup(&self, name: &str) -> Option<Contact> {
        match self.query(name) {
            Ok(c) => c,
            Err(e) => {
                error!("Lookup of {} failed: {}", name, e);
                None
            }
        }
    }
}

/// `del` for every removed record that is not a multicast group.
fn announce_removed(
    removed: &[(String, Option<Contact>)],
    sink: &dyn EventSink,
    events: &mut Vec<PortEvent>,
) {
    for (port, contact) in removed {
        if matches!(contact, Some(c) if !c.is_mcast()) {
            let event = PortEvent::Del(port.clone());
            sink.port_event(&event);
            events.push(event);
        }
    }
}

fn required(req: &Request, index: usize, msg: &str) -> Result<String, NameServiceError> {
    let v = req.arg(index);
    if v.is_empty() {
        return Err(NameServiceError::Protocol(msg.to_string()));
    }
    Ok(v)
}

fn unknown_port(port: &str) -> Reply {
    Reply::Failure(format!("port {} not known", port))
}

fn socket_arg(value: Option<&Value>) -> Result<u16, NameServiceError> {
    match value {
        None => Ok(0),
        Some(Value::Int(n)) => u16::try_from(*n)
            .map_err(|_| NameServiceError::Protocol(format!("invalid port number {}", n))),
        Some(Value::Str(s)) if is_auto(s) => Ok(0),
        Some(other) => Err(NameServiceError::Protocol(format!(
            "invalid port number {}",
            other
        ))),
    }
}

/// Prefix filter on `/`-segment boundaries: `/a` matches `/a` and `/a/b`, not `/ab`.
fn prefix_matches(prefix: &str, name: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    if !name.starts_with(prefix) {
        return false;
    }
    name.len() == prefix.len() || prefix.ends_with('/') || name.as_bytes()[prefix.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorConfig;
    use crate::store::MemoryTripleStore;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<PortEvent>>,
    }

    impl EventSink for RecordingSink {
        fn port_event(&self, event: &PortEvent) {
            self.events.lock().push(event.clone());
        }
    }

    struct StaticDelegate(Contact);

    impl NameDelegate for StaticDelegate {
        fn query_name(&self, name: &str) -> Option<Contact> {
            (name == self.0.name).then(|| self.0.clone())
        }
    }

    fn service(min: u16, max: u16) -> NameService {
        let alloc = Allocator::new(AllocatorConfig {
            min_port_number: min,
            max_port_number: max,
            default_host: "10.0.0.9".to_string(),
            ..Default::default()
        });
        NameService::new(Box::new(MemoryTripleStore::new()), alloc)
    }

    fn run(ns: &NameService, line: &str) -> Response {
        ns.apply(&Request::from_text(line).unwrap(), None, &NoEvents)
    }

    fn registered(resp: &Response) -> Contact {
        match &resp.reply {
            Reply::Registration {
                contact: Some(c), ..
            } => c.clone(),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_register_allocates() {
        let ns = service(10002, 10010);
        let sink = RecordingSink::default();
        let resp = ns.apply(
            &Request::from_text("register /cam tcp ... 0").unwrap(),
            Some("192.168.1.5"),
            &sink,
        );
        assert!(resp.ok());
        let c = registered(&resp);
        assert_eq!(c.port, 10002);
        assert_eq!(c.host, "192.168.1.5");
        assert_eq!(c.carrier, "tcp");
        assert_eq!(*sink.events.lock(), vec![PortEvent::Add("/cam".into())]);
        assert_eq!(resp.events, vec![PortEvent::Add("/cam".into())]);
    }

    #[test]
    fn test_register_without_peer_uses_default_host() {
        let ns = service(10002, 10010);
        let c = registered(&run(&ns, "register /p"));
        assert_eq!(c.host, "10.0.0.9");
        assert_eq!(c.port, 10002);
    }

    #[test]
    fn test_double_register_replaces() {
        let ns = service(10002, 10010);
        let sink = RecordingSink::default();
        ns.apply(
            &Request::from_text("register /p tcp host1 12000").unwrap(),
            None,
            &sink,
        );
        ns.apply(
            &Request::from_text("register /p udp host2 12001").unwrap(),
            None,
            &sink,
        );

        let c = ns.query("/p").unwrap().unwrap();
        assert_eq!((c.carrier.as_str(), c.host.as_str(), c.port), ("udp", "host2", 12001));
        match run(&ns, "list").reply {
            Reply::Ports(ports) => assert_eq!(ports.len(), 1),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(
            *sink.events.lock(),
            vec![
                PortEvent::Add("/p".into()),
                PortEvent::Del("/p".into()),
                PortEvent::Add("/p".into())
            ]
        );
    }

    #[test]
    fn test_unregister_releases_port() {
        let ns = service(10002, 10010);
        let p = registered(&run(&ns, "register /p"));
        run(&ns, "unregister /p");
        assert!(ns.query("/p").unwrap().is_none());
        let q = registered(&run(&ns, "register /q"));
        assert_eq!(p.port, q.port);
    }

    #[test]
    fn test_allocation_failure_registers_nothing() {
        let ns = service(10002, 10002);
        assert!(run(&ns, "register /a").ok());
        let resp = run(&ns, "register /b");
        assert!(!resp.ok());
        assert!(resp.events.is_empty());
        assert!(ns.query("/b").unwrap().is_none());
    }

    #[test]
    fn test_failed_replacement_keeps_old_registration() {
        let ns = service(10002, 10002);
        let sink = RecordingSink::default();
        assert!(run(&ns, "register /x").ok());
        assert!(run(&ns, "register /a tcp h 12000").ok());

        let resp = ns.apply(&Request::from_text("register /a").unwrap(), None, &sink);
        assert!(!resp.ok());
        assert!(resp.events.is_empty());
        assert!(sink.events.lock().is_empty());

        let a = ns.query("/a").unwrap().unwrap();
        assert_eq!((a.host.as_str(), a.port), ("h", 12000));
    }

    #[test]
    fn test_replacement_reuses_own_socket() {
        let ns = service(10002, 10002);
        let sink = RecordingSink::default();
        assert_eq!(registered(&run(&ns, "register /a")).port, 10002);

        let resp = ns.apply(&Request::from_text("register /a").unwrap(), None, &sink);
        assert_eq!(registered(&resp).port, 10002);
        assert_eq!(
            *sink.events.lock(),
            vec![PortEvent::Del("/a".into()), PortEvent::Add("/a".into())]
        );
    }

    #[test]
    fn test_list_prefix_boundary() {
        let ns = service(10002, 10010);
        for name in ["/a", "/a/b", "/ab"] {
            run(&ns, &format!("register {}", name));
        }
        let names = |line: &str| match run(&ns, line).reply {
            Reply::Ports(ports) => ports.into_iter().map(|c| c.name).collect::<Vec<_>>(),
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(names("list /a"), vec!["/a", "/a/b"]);
        assert_eq!(names("list /a/"), vec!["/a/b"]);
        assert_eq!(names("list").len(), 3);
    }

    #[test]
    fn test_network_choice() {
        let ns = service(10002, 10010);
        run(&ns, "register /p tcp 10.0.0.1 12000");
        run(&ns, "set /p ips 10.0.0.1 192.168.1.2");
        assert_eq!(ns.query("/net=192.168/p").unwrap().unwrap().host, "192.168.1.2");
        assert_eq!(ns.query("/net=172.16/p").unwrap().unwrap().host, "10.0.0.1");
        assert_eq!(ns.query("tcp://p").unwrap().unwrap().port, 12000);
    }

    #[test]
    fn test_mcast_events_suppressed() {
        let ns = service(10002, 10010);
        let sink = RecordingSink::default();
        let resp = ns.apply(
            &Request::from_text("register /m mcast ... 0").unwrap(),
            Some("192.168.1.5"),
            &sink,
        );
        assert_eq!(registered(&resp).host, "224.1.1.1");
        ns.apply(&Request::from_text("unregister /m").unwrap(), None, &sink);
        assert!(sink.events.lock().is_empty());

        // The group is free again
        let again = registered(&run(&ns, "register /n mcast"));
        assert_eq!(again.host, "224.1.1.2");
    }

    #[test]
    fn test_unregister_owned_records() {
        let ns = service(10002, 10010);
        let sink = RecordingSink::default();
        run(&ns, "register /g");
        run(&ns, "register /g/1");
        run(&ns, "set /g owns /g/1");

        ns.apply(&Request::from_text("unregister /g").unwrap(), None, &sink);
        assert!(ns.query("/g").unwrap().is_none());
        assert!(ns.query("/g/1").unwrap().is_none());
        assert_eq!(
            *sink.events.lock(),
            vec![PortEvent::Del("/g".into()), PortEvent::Del("/g/1".into())]
        );
    }

    #[test]
    fn test_set_get_check() {
        let ns = service(10002, 10010);
        run(&ns, "register /p");
        run(&ns, "set /p color red blue");
        assert_eq!(
            run(&ns, "get /p color").reply,
            Reply::Property {
                port: "/p".into(),
                key: "color".into(),
                values: vec!["red".into(), "blue".into()],
            }
        );
        match run(&ns, "check /p color blue").reply {
            Reply::Check { present, .. } => assert!(present),
            other => panic!("unexpected reply {:?}", other),
        }
        match run(&ns, "check /p color green").reply {
            Reply::Check { present, .. } => assert!(!present),
            other => panic!("unexpected reply {:?}", other),
        }

        assert!(!run(&ns, "get /missing color").ok());
        assert!(!run(&ns, "set /missing color red").ok());
        assert!(!run(&ns, "check /missing color red").ok());
    }

    #[test]
    fn test_malformed_commands() {
        let ns = service(10002, 10010);
        assert!(!run(&ns, "register").ok());
        assert!(!run(&ns, "register /p tcp host 70000").ok());
        assert!(ns.query("/p").unwrap().is_none());
        assert!(!run(&ns, "set /p").ok());
        assert!(matches!(run(&ns, "bogus").reply, Reply::NotUnderstood(_)));
    }

    #[test]
    fn test_misc_commands() {
        let ns = service(10002, 10010);
        assert_eq!(
            run(&ns, "route /a /b").reply,
            Reply::Route {
                from: "/a".into(),
                to: "/b".into(),
                route: "tcp://b".into()
            }
        );
        assert!(run(&ns, "gc").ok());
        match run(&ns, "help").reply {
            Reply::Help(lines) => assert!(lines.iter().all(|l| l.starts_with("+ "))),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_runners() {
        let ns = service(10002, 10010);
        run(&ns, "register /run1");
        run(&ns, "register /other");
        run(&ns, "set /run1 yarprun true");
        match run(&ns, "runners").reply {
            Reply::Ports(ports) => {
                assert_eq!(ports.len(), 1);
                assert_eq!(ports[0].name, "/run1");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_generated_names_and_type() {
        let ns = service(10002, 10010);
        let anon = registered(&run(&ns, "register ..."));
        assert!(anon.name.starts_with("/tmp/port/"));
        let eq = registered(&run(&ns, "register =x"));
        assert!(eq.name.ends_with("=x"));

        let typed = registered(&run(&ns, "register /img tcp ... ... yarp/image"));
        assert_eq!(typed.type_name.as_deref(), Some("yarp/image"));
    }

    #[test]
    fn test_topic_uses_server_contact() {
        let ns = service(10002, 10010).with_server_contact(Contact::new(
            "/root",
            "tcp",
            "10.1.1.1",
            10000,
        ));
        let t = registered(&run(&ns, "register /t topic"));
        assert_eq!((t.host.as_str(), t.port), ("10.1.1.1", 10000));
        assert!(t.is_topic());
    }

    #[test]
    fn test_delegate_fallback() {
        let remote = Contact::new("/far", "tcp", "10.2.2.2", 10100);
        let ns = service(10002, 10010).with_delegate(Arc::new(StaticDelegate(remote.clone())));
        assert_eq!(ns.lookup("/far"), Some(remote));
        assert_eq!(ns.lookup("/nowhere"), None);
    }

    /// Sink that resolves the announced name while handling the event.
    #[derive(Default)]
    struct LookupSink {
        ns: Mutex<Option<Arc<NameService>>>,
        seen: Mutex<Vec<(PortEvent, bool)>>,
    }

    impl EventSink for LookupSink {
        fn port_event(&self, event: &PortEvent) {
            let found = self
                .ns
                .lock()
                .as_ref()
                .map(|ns| ns.lookup(event.name()).is_some())
                .unwrap_or(false);
            self.seen.lock().push((event.clone(), found));
        }
    }

    #[test]
    fn test_events_see_registry() {
        let ns = Arc::new(service(10002, 10010));
        let sink = LookupSink::default();
        *sink.ns.lock() = Some(ns.clone());

        ns.apply(&Request::from_text("register /p").unwrap(), None, &sink);
        ns.apply(&Request::from_text("unregister /p").unwrap(), None, &sink);

        // add after commit, del before removal
        assert_eq!(
            *sink.seen.lock(),
            vec![
                (PortEvent::Add("/p".into()), true),
                (PortEvent::Del("/p".into()), true)
            ]
        );
    }

    #[test]
    fn test_prefix_matches() {
        assert!(prefix_matches("", "/x"));
        assert!(prefix_matches("/a", "/a"));
        assert!(prefix_matches("/a", "/a/b"));
        assert!(!prefix_matches("/a", "/ab"));
        assert!(prefix_matches("/a/", "/a/b"));
        assert!(!prefix_matches("/a/b", "/a"));
    }

    #[test]
    fn test_event_bottle() {
        assert_eq!(PortEvent::Add("/x".into()).to_bottle().to_string(), "add /x");
        assert_eq!(PortEvent::Del("/x".into()).to_bottle().to_string(), "del /x");
    }
}
