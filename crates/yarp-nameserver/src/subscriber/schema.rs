// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber tables.
//!
//! ```sql
//! subscriptions(id INTEGER PRIMARY KEY, src, dest, srcFull, destFull, mode)
//! topics(id INTEGER PRIMARY KEY, topic, structure)
//! live(id INTEGER PRIMARY KEY, name UNIQUE, stamp DATETIME)
//! structures(name PRIMARY KEY, yarp, <other families added on demand>)
//! ```
//!
//! Databases written by older servers may already carry the `mode` and
//! `structure` columns without any recorded schema version.

use crate::store::schema::{add_column_if_missing, Migration};
use rusqlite::Connection;

pub(crate) const COMPONENT: &str = "subscriber";

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY,
            src TEXT,
            dest TEXT,
            srcFull TEXT,
            destFull TEXT
        );
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY,
            topic TEXT
        );
        CREATE TABLE IF NOT EXISTS live (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE,
            stamp DATETIME
        );
        CREATE TABLE IF NOT EXISTS structures (
            name TEXT PRIMARY KEY,
            yarp TEXT
        );",
    )
}

fn add_subscription_mode(conn: &Connection) -> rusqlite::Result<()> {
    add_column_if_missing(conn, "subscriptions", "mode", "TEXT")
}

fn add_topic_structure(conn: &Connection) -> rusqlite::Result<()> {
    add_column_if_missing(conn, "topics", "structure", "TEXT")
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "subscriptions, topics, live and structures tables",
        apply: create_tables,
    },
    Migration {
        version: 2,
        description: "subscriptions.mode",
        apply: add_subscription_mode,
    },
    Migration {
        version: 3,
        description: "topics.structure",
        apply: add_topic_structure,
    },
];
