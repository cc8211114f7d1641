// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent subscriptions and liveness.
//!
//! A subscription is a standing wish that `src` be connected to `dest`.
//! Either side may be a topic, a virtual name that joins every publisher
//! subscribed into it with every reader subscribed out of it:
//!
//! ```text
//! /cam -> topic://img      (s1)
//! topic://img -> /viewer   (s2)
//! ==> effective pair /cam -> /viewer
//! ```
//!
//! Connections are requested when both effective endpoints are live and
//! registered. They are torn down when an endpoint dies; a subscription
//! whose `mode` is `from` (or `to`) dies with its source (or destination).
//!
//! The database lock is never held while calling the connector or the
//! name lookup.

mod schema;

use crate::bottle::Value;
use crate::connect::Connector;
use crate::contact::{canonical_name, ParsedName};
use crate::name_service::{EventSink, NameLookup, PortEvent, Response};
use crate::reply::{Reply, SubscriptionEntry};
use crate::request::Request;
use crate::store::schema::{add_column_if_missing, column_exists, migrate};
use crate::store::StoreError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Subscriber errors.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Protocol(String),
}

/// Liveness report for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Port is up (refreshes its liveness stamp)
    Alive,
    /// Port did not answer; forgotten only once its stamp is stale
    Quiet,
    /// Port is gone
    Dead,
}

impl Activity {
    pub fn from_level(level: i64) -> Self {
        match level {
            l if l > 0 => Self::Alive,
            0 => Self::Quiet,
            _ => Self::Dead,
        }
    }
}

/// A subscription row, or an effective pair through a topic.
#[derive(Debug, Clone)]
struct Link {
    src: String,
    dest: String,
    src_full: String,
    dest_full: String,
    mode: Option<String>,
}

impl Link {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            src: row.get(0)?,
            dest: row.get(1)?,
            src_full: row.get(2)?,
            dest_full: row.get(3)?,
            mode: row
                .get::<_, Option<String>>(4)?
                .filter(|m| !m.is_empty()),
        })
    }
}

const HOOKUP_SQL: &str = "
    SELECT src, dest, srcFull, destFull, mode FROM subscriptions
    WHERE (src = ?1 OR dest = ?1)
      AND EXISTS (SELECT NULL FROM live WHERE name = src)
      AND EXISTS (SELECT NULL FROM live WHERE name = dest)
    UNION
    SELECT s1.src, s2.dest, s1.srcFull, s2.destFull, NULL
    FROM subscriptions s1, subscriptions s2, topics t
    WHERE s1.dest = t.topic AND s2.src = t.topic
      AND (s1.src = ?1 OR s2.dest = ?1)
      AND EXISTS (SELECT NULL FROM live WHERE name = s1.src)
      AND EXISTS (SELECT NULL FROM live WHERE name = s2.dest)";

const BREAKDOWN_SQL: &str = "
    SELECT src, dest, srcFull, destFull, mode FROM subscriptions
    WHERE (src = ?1 AND (mode IS NOT NULL OR EXISTS (SELECT NULL FROM live WHERE name = dest)))
       OR (dest = ?1 AND (mode IS NOT NULL OR EXISTS (SELECT NULL FROM live WHERE name = src)))
    UNION
    SELECT s1.src, s2.dest, s1.srcFull, s2.destFull, NULL
    FROM subscriptions s1, subscriptions s2, topics t
    WHERE s1.dest = t.topic AND s2.src = t.topic
      AND ((s1.src = ?1 AND EXISTS (SELECT NULL FROM live WHERE name = s2.dest))
        OR (s2.dest = ?1 AND EXISTS (SELECT NULL FROM live WHERE name = s1.src)))";

const TOPIC_PAIRS_SQL: &str = "
    SELECT s1.src, s2.dest, s1.srcFull, s2.destFull, NULL
    FROM subscriptions s1, subscriptions s2, topics t
    WHERE t.topic = ?1 AND s1.dest = t.topic AND s2.src = t.topic
      AND EXISTS (SELECT NULL FROM live WHERE name = s1.src)
      AND EXISTS (SELECT NULL FROM live WHERE name = s2.dest)";

/// Subscription manager.
pub struct Subscriber {
    db: Mutex<Connection>,
    connector: Arc<dyn Connector>,
    lookup: Arc<dyn NameLookup>,
}

impl Subscriber {
    /// Open (or create) a file-backed subscriber database.
    pub fn open(
        path: &Path,
        connector: Arc<dyn Connector>,
        lookup: Arc<dyn NameLookup>,
    ) -> Result<Self, SubscriberError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn, connector, lookup)
    }

    /// Subscriber over an in-memory database.
    pub fn open_in_memory(
        connector: Arc<dyn Connector>,
        lookup: Arc<dyn NameLookup>,
    ) -> Result<Self, SubscriberError> {
        Self::with_connection(Connection::open_in_memory()?, connector, lookup)
    }

    fn with_connection(
        mut conn: Connection,
        connector: Arc<dyn Connector>,
        lookup: Arc<dyn NameLookup>,
    ) -> Result<Self, SubscriberError> {
        migrate(&mut conn, schema::COMPONENT, schema::MIGRATIONS)?;
        Ok(Self {
            db: Mutex::new(conn),
            connector,
            lookup,
        })
    }

    /// Record a subscription and connect it if possible.
    pub fn add_subscription(&self, src: &str, dest: &str, mode: &str) -> Result<(), SubscriberError> {
        self.remove_subscription(src, dest)?;

        let psrc = ParsedName::parse(src);
        let pdest = ParsedName::parse(dest);
        if psrc.is_topic() {
            self.set_topic(&psrc.port_name, "", true)?;
        }
        if pdest.is_topic() {
            self.set_topic(&pdest.port_name, "", true)?;
        }

        let mode = Some(mode).filter(|m| !m.is_empty());
        {
            let db = self.db.lock();
            db.execute(
                "INSERT INTO subscriptions (src, dest, srcFull, destFull, mode)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![psrc.port_name, pdest.port_name, src, dest, mode],
            )?;
        }
        info!("Subscribed {} -> {}", src, dest);

        let src_is_topic = psrc.is_topic() || self.is_topic(&psrc.port_name);
        let dest_is_topic = pdest.is_topic() || self.is_topic(&pdest.port_name);
        match (src_is_topic, dest_is_topic) {
            (false, false) => {
                if self.is_live(&psrc.port_name)? && self.is_live(&pdest.port_name)? {
                    self.check_subscription(&Link {
                        src: psrc.port_name,
                        dest: pdest.port_name,
                        src_full: src.to_string(),
                        dest_full: dest.to_string(),
                        mode: mode.map(str::to_string),
                    });
                }
            }
            (false, true) => self.hookup(&psrc.port_name)?,
            (true, false) => self.hookup(&pdest.port_name)?,
            (true, true) => {}
        }
        Ok(())
    }

    /// Forget a subscription. Existing connections are left alone.
    pub fn remove_subscription(&self, src: &str, dest: &str) -> Result<(), SubscriberError> {
        let (src, dest) = (canonical_name(src), canonical_name(dest));
        let removed = self.db.lock().execute(
            "DELETE FROM subscriptions WHERE src = ?1 AND dest = ?2",
            params![src, dest],
        )?;
        if removed > 0 {
            info!("Unsubscribed {} -> {}", src, dest);
        }
        Ok(())
    }

    /// Update liveness of `port` and react to it.
    pub fn welcome(&self, port: &str, activity: Activity) -> Result<(), SubscriberError> {
        let port = canonical_name(port);
        {
            let db = self.db.lock();
            match activity {
                Activity::Alive => db.execute(
                    "INSERT OR REPLACE INTO live (name, stamp) VALUES (?1, DATETIME('now'))",
                    [&port],
                )?,
                Activity::Quiet => db.execute(
                    "DELETE FROM live WHERE name = ?1 AND stamp < DATETIME('now', '-30 seconds')",
                    [&port],
                )?,
                Activity::Dead => db.execute("DELETE FROM live WHERE name = ?1", [&port])?,
            };
        }
        debug!("welcome {} {:?}", port, activity);

        match activity {
            Activity::Alive => self.hookup(&port),
            Activity::Dead => self.breakdown(&port),
            Activity::Quiet => Ok(()),
        }
    }

    pub fn is_live(&self, port: &str) -> Result<bool, SubscriberError> {
        let found = self
            .db
            .lock()
            .query_row(
                "SELECT 1 FROM live WHERE name = ?1",
                [canonical_name(port)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Connect every live subscription touching `port`.
    pub fn hookup(&self, port: &str) -> Result<(), SubscriberError> {
        for link in self.select_links(HOOKUP_SQL, port)? {
            self.check_subscription(&link);
        }
        Ok(())
    }

    /// Disconnect every subscription touching the dying `port`.
    pub fn breakdown(&self, port: &str) -> Result<(), SubscriberError> {
        for link in self.select_links(BREAKDOWN_SQL, port)? {
            self.break_subscription(port, &link)?;
        }
        Ok(())
    }

    fn select_links(&self, sql: &str, key: &str) -> Result<Vec<Link>, SubscriberError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(sql)?;
        let links = stmt
            .query_map([key], Link::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn is_topic(&self, name: &str) -> bool {
        let found = self
            .db
            .lock()
            .query_row("SELECT 1 FROM topics WHERE topic = ?1", [name], |_| Ok(()))
            .optional();
        match found {
            Ok(found) => found.is_some(),
            Err(e) => {
                error!("Topic lookup for {} failed: {}", name, e);
                false
            }
        }
    }

    fn check_subscription(&self, link: &Link) {
        debug!("+++ Checking {} {}", link.src_full, link.dest_full);
        let csrc = self.lookup.lookup(&link.src);
        let cdest = self.lookup.lookup(&link.dest);

        if let (Some(s), Some(d)) = (&csrc, &cdest) {
            let virtual_end =
                s.is_topic() || d.is_topic() || self.is_topic(&link.src) || self.is_topic(&link.dest);
            if !virtual_end {
                debug!("++> connect {} {}", link.src_full, link.dest_full);
                self.connector.connect(&link.src_full, &link.dest_full);
            }
        }

        let orphaned = match link.mode.as_deref() {
            Some("from") => csrc.is_none(),
            Some("to") => cdest.is_none(),
            _ => false,
        };
        if orphaned {
            if let Err(e) = self.remove_subscription(&link.src, &link.dest) {
                error!("Cannot drop {} -> {}: {}", link.src, link.dest, e);
            }
        }
    }

    fn break_subscription(&self, dropper: &str, link: &Link) -> Result<(), SubscriberError> {
        debug!("--- Checking {} {}", link.src_full, link.dest_full);
        let src_drop = dropper == link.src;
        let dying = if src_drop { &link.src } else { &link.dest };
        if self.lookup.lookup(dying).is_some() {
            debug!("--> disconnect {} {}", link.src_full, link.dest_full);
            self.connector.disconnect(&link.src_full, &link.dest_full);
        }

        match link.mode.as_deref() {
            Some("from") if src_drop => self.remove_subscription(&link.src, &link.dest),
            Some("to") if !src_drop => self.remove_subscription(&link.src, &link.dest),
            _ => Ok(()),
        }
    }

    /// Subscriptions touching `port` (all of them when `port` is empty).
    pub fn list_subscriptions(&self, port: &str) -> Result<Vec<SubscriptionEntry>, SubscriberError> {
        const COLUMNS: &str = "SELECT s.srcFull, s.destFull,
                EXISTS (SELECT topic FROM topics WHERE topic = s.src),
                EXISTS (SELECT topic FROM topics WHERE topic = s.dest),
                s.mode
            FROM subscriptions s";

        let db = self.db.lock();
        let entry = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SubscriptionEntry> {
            Ok(SubscriptionEntry {
                src: row.get(0)?,
                dest: row.get(1)?,
                src_topic: row.get(2)?,
                dest_topic: row.get(3)?,
                mode: row
                    .get::<_, Option<String>>(4)?
                    .filter(|m| !m.is_empty()),
            })
        };

        let entries = if port.is_empty() {
            let mut stmt = db.prepare(&format!("{} ORDER BY s.src, s.dest", COLUMNS))?;
            let rows = stmt.query_map([], entry)?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = db.prepare(&format!(
                "{} WHERE s.src = ?1 OR s.dest = ?1 ORDER BY s.src, s.dest",
                COLUMNS
            ))?;
            let rows = stmt.query_map([canonical_name(port)], entry)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        Ok(entries)
    }

    /// Create, refresh or (with `active == false`) remove a topic.
    pub fn set_topic(&self, name: &str, structure: &str, active: bool) -> Result<(), SubscriberError> {
        let topic = canonical_name(name);
        let links = {
            let db = self.db.lock();
            if !structure.is_empty() || !active {
                db.execute("DELETE FROM topics WHERE topic = ?1", [&topic])?;
            }
            if !active {
                info!("Removed topic {}", topic);
                return Ok(());
            }

            let have_topic = structure.is_empty()
                && db
                    .query_row("SELECT 1 FROM topics WHERE topic = ?1", [&topic], |_| Ok(()))
                    .optional()?
                    .is_some();
            if !have_topic {
                let structure = Some(structure).filter(|s| !s.is_empty());
                db.execute(
                    "INSERT INTO topics (topic, structure) VALUES (?1, ?2)",
                    params![topic, structure],
                )?;
                info!("Added topic {}", topic);
            }

            let mut stmt = db.prepare(TOPIC_PAIRS_SQL)?;
            let links = stmt
                .query_map([&topic], Link::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            links
        };

        for link in &links {
            self.check_subscription(link);
        }
        Ok(())
    }

    pub fn list_topics(&self) -> Result<Vec<String>, SubscriberError> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT topic FROM topics ORDER BY id")?;
        let topics = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(topics)
    }

    /// Store `value` for `structure` under the `family` column.
    pub fn set_type(&self, family: &str, structure: &str, value: &str) -> Result<(), SubscriberError> {
        check_family(family)?;
        let db = self.db.lock();
        add_column_if_missing(&db, "structures", family, "TEXT")?;
        db.execute(
            &format!(
                "INSERT INTO structures (name, {0}) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET {0} = excluded.{0}",
                family
            ),
            params![structure, value],
        )?;
        debug!("type {} {} = {}", family, structure, value);
        Ok(())
    }

    pub fn get_type(&self, family: &str, structure: &str) -> Result<Option<String>, SubscriberError> {
        check_family(family)?;
        let db = self.db.lock();
        if !column_exists(&db, "structures", family)? {
            return Ok(None);
        }
        let value = db
            .query_row(
                &format!("SELECT {} FROM structures WHERE name = ?1", family),
                [structure],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(value)
    }

    /// Execute a subscriber command; `None` if `req` is not one.
    pub fn apply(&self, req: &Request) -> Option<Response> {
        let result = match req.verb.as_str() {
            "subscribe" => self.cmd_subscribe(req),
            "unsubscribe" => self.cmd_unsubscribe(req),
            "announce" => self.cmd_announce(req),
            "topic" => self.cmd_topic(req),
            "untopic" => self.cmd_untopic(req),
            "type" => self.cmd_type(req),
            _ => return None,
        };
        let reply = result.unwrap_or_else(|e| {
            match &e {
                SubscriberError::Protocol(msg) => warn!("{}: {}", req.verb, msg),
                other => error!("{} failed: {}", req.verb, other),
            }
            Reply::Failure(e.to_string())
        });
        Some(Response::new(reply, req.format))
    }

    fn cmd_subscribe(&self, req: &Request) -> Result<Reply, SubscriberError> {
        match req.args.len() {
            0 => Ok(Reply::Subscriptions(self.list_subscriptions("")?)),
            1 => Ok(Reply::Subscriptions(self.list_subscriptions(&req.arg(0))?)),
            _ => {
                self.add_subscription(&req.arg(0), &req.arg(1), &req.arg(2))?;
                Ok(Reply::Done)
            }
        }
    }

    fn cmd_unsubscribe(&self, req: &Request) -> Result<Reply, SubscriberError> {
        if req.args.len() < 2 {
            return Err(SubscriberError::Protocol(
                "unsubscribe needs a source and a destination".to_string(),
            ));
        }
        self.remove_subscription(&req.arg(0), &req.arg(1))?;
        Ok(Reply::Done)
    }

    fn cmd_announce(&self, req: &Request) -> Result<Reply, SubscriberError> {
        let port = req.arg(0);
        if port.is_empty() {
            return Err(SubscriberError::Protocol("announce needs a port name".to_string()));
        }
        let level = req.args.get(1).and_then(Value::as_int).unwrap_or(1);
        self.welcome(&port, Activity::from_level(level))?;
        Ok(Reply::Done)
    }

    fn cmd_topic(&self, req: &Request) -> Result<Reply, SubscriberError> {
        if req.args.is_empty() {
            return Ok(Reply::Topics(self.list_topics()?));
        }
        self.set_topic(&req.arg(0), &req.arg(1), true)?;
        Ok(Reply::Done)
    }

    fn cmd_untopic(&self, req: &Request) -> Result<Reply, SubscriberError> {
        let name = req.arg(0);
        if name.is_empty() {
            return Err(SubscriberError::Protocol("untopic needs a topic name".to_string()));
        }
        self.set_topic(&name, "", false)?;
        Ok(Reply::Done)
    }

    fn cmd_type(&self, req: &Request) -> Result<Reply, SubscriberError> {
        let (family, structure) = (req.arg(0), req.arg(1));
        if family.is_empty() || structure.is_empty() {
            return Err(SubscriberError::Protocol(
                "type needs a family and a structure".to_string(),
            ));
        }
        if req.args.len() > 2 {
            self.set_type(&family, &structure, &req.arg(2))?;
            return Ok(Reply::Done);
        }
        match self.get_type(&family, &structure)? {
            Some(value) => Ok(Reply::TypeValue {
                family,
                structure,
                value,
            }),
            None => Ok(Reply::Failure(format!("no {} type for {}", family, structure))),
        }
    }
}

/// Family names become column names.
fn check_family(family: &str) -> Result<(), SubscriberError> {
    let valid = !family.is_empty()
        && family.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !family.starts_with(|c: char| c.is_ascii_digit())
        && !family.eq_ignore_ascii_case("name");
    if valid {
        Ok(())
    } else {
        Err(SubscriberError::Protocol(format!("invalid type family {}", family)))
    }
}

impl EventSink for Subscriber {
    fn port_event(&self, event: &PortEvent) {
        let result = match event {
            PortEvent::Add(name) => self.welcome(name, Activity::Alive),
            PortEvent::Del(name) => self.welcome(name, Activity::Dead),
        };
        if let Err(e) = result {
            error!("Handling {:?} failed: {}", event, e);
        }
    }
}
