// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Port contacts and port-name parsing.

use serde::{Deserialize, Serialize};

/// Placeholder meaning "fill this field in for me".
pub const AUTO: &str = "...";

/// Carrier used for virtual topic ports.
pub const TOPIC_CARRIER: &str = "topic";

/// Carrier used for multicast groups.
pub const MCAST_CARRIER: &str = "mcast";

/// Returns true if a textual field is unset (empty or `...`).
pub fn is_auto(field: &str) -> bool {
    field.is_empty() || field == AUTO
}

/// Where a port can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Registered port name
    pub name: String,

    /// Transport carrier (tcp, udp, mcast, topic, ...)
    pub carrier: String,

    /// Host name or IP address
    pub host: String,

    /// Socket port number (0 = unset)
    pub port: u16,

    /// Optional type name recorded at registration
    #[serde(default)]
    pub type_name: Option<String>,
}

impl Contact {
    pub fn new(
        name: impl Into<String>,
        carrier: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            carrier: carrier.into(),
            host: host.into(),
            port,
            type_name: None,
        }
    }

    pub fn is_mcast(&self) -> bool {
        self.carrier == MCAST_CARRIER
    }

    pub fn is_topic(&self) -> bool {
        self.carrier == TOPIC_CARRIER
    }

    /// `host:port` string suitable for socket connects.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A port name split into its carrier, network choice and bare name.
///
/// ```text
/// tcp://camera        -> carrier "tcp",   name "/camera"
/// topic://imu         -> carrier "topic", name "/imu"
/// /net=10.0/camera    -> network "10.0",  name "/camera"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub carrier: Option<String>,
    pub network_choice: Option<String>,
    pub port_name: String,
}

impl ParsedName {
    pub fn parse(text: &str) -> Self {
        let mut carrier = None;
        let mut base = text;

        if let Some(mid) = base.find(":/") {
            if mid > 0 {
                carrier = Some(base[..mid].to_string());
                base = &base[mid + 1..];
                if base.starts_with("//") {
                    base = &base[1..];
                }
            }
        }

        let mut network_choice = None;
        if base.starts_with("/net=") || base.starts_with("/NET=") {
            if let Some(end) = base[5..].find('/') {
                network_choice = Some(base[5..5 + end].to_string());
                base = &base[5 + end..];
            }
        }

        Self {
            carrier,
            network_choice,
            port_name: base.to_string(),
        }
    }

    pub fn is_topic(&self) -> bool {
        self.carrier.as_deref() == Some(TOPIC_CARRIER)
    }
}

/// Canonical (carrier and network stripped) form of a port name.
pub fn canonical_name(text: &str) -> String {
    ParsedName::parse(text).port_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let p = ParsedName::parse("/camera/left");
        assert_eq!(p.carrier, None);
        assert_eq!(p.network_choice, None);
        assert_eq!(p.port_name, "/camera/left");
    }

    #[test]
    fn test_parse_carrier() {
        let p = ParsedName::parse("tcp://camera");
        assert_eq!(p.carrier.as_deref(), Some("tcp"));
        assert_eq!(p.port_name, "/camera");

        let p = ParsedName::parse("topic:/imu");
        assert!(p.is_topic());
        assert_eq!(p.port_name, "/imu");
    }

    #[test]
    fn test_parse_network_choice() {
        let p = ParsedName::parse("/net=192.168/camera");
        assert_eq!(p.network_choice.as_deref(), Some("192.168"));
        assert_eq!(p.port_name, "/camera");

        // No trailing segment: left untouched
        let p = ParsedName::parse("/net=eth0");
        assert_eq!(p.network_choice, None);
        assert_eq!(p.port_name, "/net=eth0");
    }

    #[test]
    fn test_contact_helpers() {
        let c = Contact::new("/p", "mcast", "224.1.1.1", 10002);
        assert!(c.is_mcast());
        assert_eq!(c.socket_address(), "224.1.1.1:10002");
        assert!(is_auto(""));
    }
}
