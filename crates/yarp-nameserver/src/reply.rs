// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command results and their two wire encodings.
//!
//! Every command produces one [`Reply`]. It is rendered either in the
//! legacy encoding (flat strings, prefixed with `old`) or in the structured
//! encoding (nested `(key value)` lists). Both carry the same information.
//!
//! ```text
//! legacy:     old (registration name /cam ip 10.0.0.4 port 10002 type tcp)
//! structured: port (name /cam) (ip 10.0.0.4) (port_number 10002) (carrier tcp)
//! ```

use crate::bottle::{Bottle, Value};
use crate::contact::Contact;

/// Requested reply encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFormat {
    #[default]
    Legacy,
    Structured,
}

/// One row of a subscription listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub src: String,
    pub dest: String,
    pub mode: Option<String>,
    pub src_topic: bool,
    pub dest_topic: bool,
}

/// Format-independent command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Result of register/unregister/query; `None` when the port is unknown.
    Registration {
        name: String,
        contact: Option<Contact>,
    },
    /// Result of list/runners.
    Ports(Vec<Contact>),
    /// Attribute values of a port (set/get).
    Property {
        port: String,
        key: String,
        values: Vec<String>,
    },
    /// Attribute membership test.
    Check {
        port: String,
        key: String,
        value: String,
        present: bool,
    },
    Route {
        from: String,
        to: String,
        route: String,
    },
    Message(String),
    Help(Vec<String>),
    Subscriptions(Vec<SubscriptionEntry>),
    Topics(Vec<String>),
    TypeValue {
        family: String,
        structure: String,
        value: String,
    },
    /// Generic success acknowledgement.
    Done,
    Failure(String),
    NotUnderstood(String),
}

const ERR_FAILURE: i64 = -1;
const ERR_UNKNOWN_PORT: i64 = -2;
const ERR_NOT_UNDERSTOOD: i64 = -3;

const HELP_BANNER: &str = "Here are some ways to use the name server:";

impl Reply {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_) | Self::NotUnderstood(_))
    }

    pub fn render(&self, format: ReplyFormat) -> Bottle {
        match format {
            ReplyFormat::Legacy => self.legacy(),
            ReplyFormat::Structured => self.structured(),
        }
    }

    /// Legacy encoding.
    pub fn legacy(&self) -> Bottle {
        let mut out = Bottle::new();
        out.add_str("old");
        match self {
            Self::Registration { contact, .. } => {
                out.add_list(contact.as_ref().map(legacy_registration).unwrap_or_default());
            }
            Self::Ports(contacts) => {
                for c in contacts {
                    out.add_list(legacy_registration(c));
                }
            }
            Self::Property { port, key, values } => {
                let mut q = Bottle::new();
                q.add_str("port").add_str(port.as_str());
                q.add_str("property").add_str(key.as_str()).add_str("=");
                for v in values {
                    q.add_str(v.as_str());
                }
                out.add_list(q);
            }
            Self::Check {
                port,
                key,
                value,
                present,
            } => {
                let mut q = Bottle::new();
                q.add_str("port").add_str(port.as_str());
                q.add_str("property").add_str(key.as_str());
                q.add_str("value").add_str(value.as_str());
                q.add_str("present").add_str(present.to_string());
                out.add_list(q);
            }
            Self::Route { from, to, route } => {
                let mut q = Bottle::new();
                q.add_str("port").add_str(from.as_str());
                q.add_str("route").add_str(to.as_str());
                q.add_str("=").add_str(route.as_str());
                out.add_list(q);
            }
            Self::Message(msg) => {
                let mut q = Bottle::new();
                q.add_str(msg.as_str());
                out.add_list(q);
            }
            Self::Help(lines) => {
                out.add_str(HELP_BANNER);
                for l in lines {
                    out.add_str(l.as_str());
                }
            }
            Self::Subscriptions(entries) => {
                for e in entries {
                    let mut q = Bottle::new();
                    q.add_str("subscription");
                    q.add_str("src").add_str(e.src.as_str());
                    q.add_str("dest").add_str(e.dest.as_str());
                    if let Some(mode) = &e.mode {
                        q.add_str("mode").add_str(mode.as_str());
                    }
                    if e.src_topic || e.dest_topic {
                        q.add_str("topic");
                        q.add_int(e.src_topic as i64).add_int(e.dest_topic as i64);
                    }
                    out.add_list(q);
                }
            }
            Self::Topics(topics) => {
                for t in topics {
                    out.add_str(t.as_str());
                }
            }
            Self::TypeValue {
                family,
                structure,
                value,
            } => {
                let mut q = Bottle::new();
                q.add_str("type").add_str(family.as_str());
                q.add_str(structure.as_str()).add_str("=").add_str(value.as_str());
                out.add_list(q);
            }
            Self::Done => {
                out.add_str("ok");
            }
            Self::Failure(msg) | Self::NotUnderstood(msg) => {
                out.add_list(Bottle::pair("error", msg.as_str()));
            }
        }
        out
    }

    /// Structured encoding.
    pub fn structured(&self) -> Bottle {
        let mut out = Bottle::new();
        match self {
            Self::Registration { contact, .. } => match contact {
                Some(c) => out = structured_port(c),
                None => {
                    out.add_str("port");
                    out.add_list(error_list(ERR_UNKNOWN_PORT, "port not known"));
                }
            },
            Self::Ports(contacts) => {
                out.add_str("ports");
                for c in contacts {
                    out.add_list(structured_port(c));
                }
            }
            Self::Property { port, key, values } => {
                out.add_str("property");
                out.add_list(Bottle::pair("port", port.as_str()));
                out.add_list(Bottle::pair("key", key.as_str()));
                let mut vals = Bottle::new();
                vals.add_str("values");
                for v in values {
                    vals.push(Value::Str(v.clone()));
                }
                out.add_list(vals);
            }
            Self::Check {
                port,
                key,
                value,
                present,
            } => {
                out.add_str("check");
                out.add_list(Bottle::pair("port", port.as_str()));
                out.add_list(Bottle::pair("key", key.as_str()));
                out.add_list(Bottle::pair("value", value.as_str()));
                out.add_list(Bottle::pair("present", present.to_string()));
            }
            Self::Route { from, to, route } => {
                out.add_str("route");
                out.add_list(Bottle::pair("from", from.as_str()));
                out.add_list(Bottle::pair("to", to.as_str()));
                out.add_list(Bottle::pair("route", route.as_str()));
            }
            Self::Message(msg) => {
                out.add_str("message").add_str(msg.as_str());
            }
            Self::Help(lines) => {
                out.add_str("help");
                for l in lines {
                    out.add_str(l.as_str());
                }
            }
            Self::Subscriptions(entries) => {
                out.add_str("subscriptions");
                for e in entries {
                    let mut q = Bottle::new();
                    q.add_str("subscription");
                    q.add_list(Bottle::pair("src", e.src.as_str()));
                    q.add_list(Bottle::pair("dest", e.dest.as_str()));
                    if let Some(mode) = &e.mode {
                        q.add_list(Bottle::pair("mode", mode.as_str()));
                    }
                    if e.src_topic || e.dest_topic {
                        let mut t = Bottle::new();
                        t.add_str("topic");
                        t.add_int(e.src_topic as i64).add_int(e.dest_topic as i64);
                        q.add_list(t);
                    }
                    out.add_list(q);
                }
            }
            Self::Topics(topics) => {
                out.add_str("topics");
                for t in topics {
                    out.add_str(t.as_str());
                }
            }
            Self::TypeValue {
                family,
                structure,
                value,
            } => {
                out.add_str("type");
                out.add_list(Bottle::pair("family", family.as_str()));
                out.add_list(Bottle::pair("structure", structure.as_str()));
                out.add_list(Bottle::pair("value", value.as_str()));
            }
            Self::Done => {
                out.add_str("ok");
            }
            Self::Failure(msg) => {
                out = error_list(ERR_FAILURE, msg);
            }
            Self::NotUnderstood(msg) => {
                out = error_list(ERR_NOT_UNDERSTOOD, msg);
            }
        }
        out
    }
}

fn legacy_registration(c: &Contact) -> Bottle {
    let mut q = Bottle::new();
    q.add_str("registration");
    q.add_str("name").add_str(c.name.as_str());
    q.add_str("ip").add_str(c.host.as_str());
    q.add_str("port").add_int(c.port as i64);
    q.add_str("type").add_str(c.carrier.as_str());
    q
}

fn structured_port(c: &Contact) -> Bottle {
    let mut q = Bottle::new();
    q.add_str("port");
    q.add_list(Bottle::pair("name", c.name.as_str()));
    q.add_list(Bottle::pair("ip", c.host.as_str()));
    q.add_list(Bottle::pair("port_number", c.port as i64));
    q.add_list(Bottle::pair("carrier", c.carrier.as_str()));
    if let Some(t) = &c.type_name {
        q.add_list(Bottle::pair("type", t.as_str()));
    }
    q
}

fn error_list(code: i64, msg: &str) -> Bottle {
    let mut e = Bottle::new();
    e.add_str("error").add_int(code).add_str(msg);
    e
}

/// Decode a structured `port (name ..) (ip ..) (port_number ..) (carrier ..)`
/// reply back into a contact.
pub fn contact_from_structured(reply: &Bottle) -> Option<Contact> {
    if reply.get(0).and_then(Value::as_str) != Some("port") {
        return None;
    }
    let name = reply.find("name")?.text();
    let host = reply.find("ip")?.text();
    let port = u16::try_from(reply.find("port_number")?.as_int()?).ok()?;
    let carrier = reply
        .find("carrier")
        .map(Value::text)
        .unwrap_or_else(|| "tcp".to_string());
    let mut c = Contact::new(name, carrier, host, port);
    c.type_name = reply.find("type").map(Value::text);
    Some(c)
}
