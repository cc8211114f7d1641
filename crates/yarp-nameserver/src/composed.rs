// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name service and subscriber behind a single command entry point.
//!
//! Commands are serialized: the subscriber sees every `add`/`del` event of
//! a registration before the next command starts.

use crate::bottle::Bottle;
use crate::name_service::{NameService, Response};
use crate::reply::{Reply, ReplyFormat};
use crate::request::Request;
use crate::subscriber::Subscriber;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Front end dispatching each command to the subscriber or the name service.
pub struct ComposedNameService {
    serial: Mutex<()>,
    names: Arc<NameService>,
    subscriber: Arc<Subscriber>,
    silent: bool,
}

impl ComposedNameService {
    pub fn new(names: Arc<NameService>, subscriber: Arc<Subscriber>) -> Self {
        Self {
            serial: Mutex::new(()),
            names,
            subscriber,
            silent: false,
        }
    }

    /// Suppress the per-command log line.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn names(&self) -> &Arc<NameService> {
        &self.names
    }

    pub fn subscriber(&self) -> &Arc<Subscriber> {
        &self.subscriber
    }

    /// Execute one decoded command.
    pub fn apply(&self, req: &Request, remote_host: Option<&str>) -> Response {
        let _serial = self.serial.lock();
        if !self.silent {
            info!(" * {} {}", req.verb, req.args);
        }

        let response = match self.subscriber.apply(req) {
            Some(response) => response,
            None => self.names.apply(req, remote_host, self.subscriber.as_ref()),
        };

        if !response.ok() {
            debug!("{} -> {}", req.verb, response.to_bottle());
        }
        response
    }

    /// Execute a command bottle.
    pub fn apply_bottle(&self, cmd: &Bottle, remote_host: Option<&str>) -> Bottle {
        self.apply(&Request::parse(cmd), remote_host).to_bottle()
    }

    /// Execute one line of command text and render the reply line.
    pub fn apply_line(&self, line: &str, remote_host: Option<&str>) -> String {
        match Request::from_text(line) {
            Ok(req) => self.apply(&req, remote_host).to_bottle().to_string(),
            Err(e) => {
                warn!("Malformed command {:?}: {}", line, e);
                Reply::Failure(e.to_string())
                    .render(ReplyFormat::Legacy)
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Allocator, AllocatorConfig};
    use crate::connect::Connector;
    use crate::store::MemoryTripleStore;

    #[derive(Default)]
    struct RecordingConnector {
        calls: parking_lot::Mutex<Vec<(String, String, bool)>>,
    }

    impl Connector for RecordingConnector {
        fn connect(&self, src: &str, dest: &str) {
            self.calls.lock().push((src.to_string(), dest.to_string(), true));
        }

        fn disconnect(&self, src: &str, dest: &str) {
            self.calls.lock().push((src.to_string(), dest.to_string(), false));
        }
    }

    fn composed() -> (ComposedNameService, Arc<RecordingConnector>) {
        let names = Arc::new(NameService::new(
            Box::new(MemoryTripleStore::new()),
            Allocator::new(AllocatorConfig::default()),
        ));
        let connector = Arc::new(RecordingConnector::default());
        let subscriber =
            Arc::new(Subscriber::open_in_memory(connector.clone(), names.clone()).unwrap());
        (
            ComposedNameService::new(names, subscriber).silent(true),
            connector,
        )
    }

    #[test]
    fn test_routes_to_name_service() {
        let (svc, _) = composed();
        let reply = svc.apply_line("register /a tcp 10.0.0.1 10050", None);
        assert_eq!(
            reply,
            "old (registration name /a ip 10.0.0.1 port 10050 type tcp)"
        );
        assert!(svc.apply_line("query /a", None).contains("port 10050"));
    }

    #[test]
    fn test_routes_to_subscriber() {
        let (svc, _) = composed();
        assert_eq!(svc.apply_line("subscribe /a /b", None), "old ok");
        let listing = svc.apply_line("subscribe", None);
        assert!(listing.contains("/a"));
        assert!(listing.contains("/b"));
    }

    #[test]
    fn test_registration_events_reach_subscriber() {
        let (svc, connector) = composed();
        svc.apply_line("subscribe /a /b", None);
        svc.apply_line("register /a tcp 10.0.0.1 10050", None);
        assert!(connector.calls.lock().is_empty());

        svc.apply_line("register /b tcp 10.0.0.1 10051", None);
        assert_eq!(
            *connector.calls.lock(),
            vec![("/a".to_string(), "/b".to_string(), true)]
        );
        assert!(svc.subscriber().is_live("/b").unwrap());

        svc.apply_line("unregister /b", None);
        assert!(!svc.subscriber().is_live("/b").unwrap());
    }

    #[test]
    fn test_structured_prefix() {
        let (svc, _) = composed();
        svc.apply_line("register /a tcp 10.0.0.1 10050", None);
        let reply = svc.apply_line("bot query /a", None);
        assert!(reply.starts_with("port (name /a)"));
    }

    #[test]
    fn test_malformed_line() {
        let (svc, _) = composed();
        let reply = svc.apply_line("register (/a", None);
        assert!(reply.starts_with("old (error"));
    }

    #[test]
    fn test_unknown_command() {
        let (svc, _) = composed();
        let reply = svc.apply_bottle(&Bottle::from_text("frobnicate").unwrap(), None);
        assert!(reply.to_string().contains("frobnicate"));
    }
}
