// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Whole-stack scenarios: name service, subscriber and connect workers
//! wired the way the server wires them, over a fake port transport.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use yarp_nameserver::{
    Allocator, AllocatorConfig, ComposedNameService, ConnectManager, Connector, Contact,
    NameService, PortTransport, Reply, Request, SqliteTripleStore, Subscriber, TransportError,
};

/// Records transport operations and keeps the resulting connection state.
#[derive(Default)]
struct FakeTransport {
    connected: Mutex<HashSet<(String, String)>>,
    ops: Mutex<Vec<String>>,
    latency: Duration,
}

impl FakeTransport {
    fn slow(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    fn is_up(&self, src: &str, dest: &str) -> bool {
        self.connected
            .lock()
            .contains(&(src.to_string(), dest.to_string()))
    }
}

impl PortTransport for FakeTransport {
    fn is_connected(&self, src: &str, dest: &str) -> Result<bool, TransportError> {
        Ok(self.is_up(src, dest))
    }

    fn connect(&self, src: &str, dest: &str) -> Result<(), TransportError> {
        thread::sleep(self.latency);
        self.ops.lock().push(format!("connect {} {}", src, dest));
        self.connected
            .lock()
            .insert((src.to_string(), dest.to_string()));
        Ok(())
    }

    fn disconnect(&self, src: &str, dest: &str) -> Result<(), TransportError> {
        thread::sleep(self.latency);
        self.ops.lock().push(format!("disconnect {} {}", src, dest));
        self.connected
            .lock()
            .remove(&(src.to_string(), dest.to_string()));
        Ok(())
    }
}

struct Stack {
    service: ComposedNameService,
    manager: Arc<ConnectManager>,
    transport: Arc<FakeTransport>,
}

impl Stack {
    fn new(config: AllocatorConfig) -> Self {
        let store = SqliteTripleStore::open_in_memory().unwrap();
        let names = Arc::new(NameService::new(Box::new(store), Allocator::new(config)));
        let transport = Arc::new(FakeTransport::default());
        let manager = Arc::new(ConnectManager::new(transport.clone(), 2).unwrap());
        let subscriber =
            Arc::new(Subscriber::open_in_memory(manager.clone(), names.clone()).unwrap());
        Self {
            service: ComposedNameService::new(names, subscriber).silent(true),
            manager,
            transport,
        }
    }

    fn run(&self, line: &str) -> Reply {
        self.service
            .apply(&Request::from_text(line).unwrap(), None)
            .reply
    }

    fn settle(&self) {
        assert!(self.manager.wait_idle(Duration::from_secs(5)));
    }
}

fn registered(reply: Reply) -> Contact {
    match reply {
        Reply::Registration {
            contact: Some(c), ..
        } => c,
        other => panic!("expected a registration, got {:?}", other),
    }
}

fn port_names(reply: Reply) -> Vec<String> {
    match reply {
        Reply::Ports(contacts) => contacts.into_iter().map(|c| c.name).collect(),
        other => panic!("expected a port list, got {:?}", other),
    }
}

#[test]
fn test_register_query_unregister() {
    let stack = Stack::new(AllocatorConfig::default());

    let cam = registered(stack.run("register /cam tcp ... 0"));
    assert!((10002..=19999).contains(&cam.port));

    let found = registered(stack.run("query /cam"));
    assert_eq!(found.host, cam.host);
    assert_eq!(found.port, cam.port);
    assert_eq!(found.carrier, "tcp");

    stack.run("unregister /cam");
    assert!(matches!(
        stack.run("query /cam"),
        Reply::Registration { contact: None, .. }
    ));
}

#[test]
fn test_reregistration_replaces() {
    let stack = Stack::new(AllocatorConfig::default());
    stack.run("register /p tcp 10.0.0.1 10100");
    stack.run("register /p udp 10.0.0.2 10200");

    let p = registered(stack.run("query /p"));
    assert_eq!((p.host.as_str(), p.port, p.carrier.as_str()), ("10.0.0.2", 10200, "udp"));
    assert_eq!(port_names(stack.run("list")), vec!["/p".to_string()]);
}

#[test]
fn test_freed_port_is_reused() {
    let stack = Stack::new(AllocatorConfig {
        min_port_number: 10002,
        max_port_number: 10002,
        ..Default::default()
    });

    let p = registered(stack.run("register /p"));
    assert_eq!(p.port, 10002);
    assert!(stack.run("register /q").is_failure());

    stack.run("unregister /p");
    let q = registered(stack.run("register /q"));
    assert_eq!(q.port, 10002);
}

#[test]
fn test_list_prefix_on_segment_boundary() {
    let stack = Stack::new(AllocatorConfig::default());
    for name in ["/a", "/a/x", "/ab", "/b"] {
        stack.run(&format!("register {}", name));
    }

    let mut names = port_names(stack.run("list /a"));
    names.sort();
    assert_eq!(names, vec!["/a".to_string(), "/a/x".to_string()]);
}

#[test]
fn test_subscription_connects_when_both_ends_live() {
    let stack = Stack::new(AllocatorConfig::default());
    stack.run("subscribe /a /b");

    stack.run("register /a");
    stack.settle();
    assert!(stack.transport.ops().is_empty());

    stack.run("register /b");
    stack.settle();
    assert_eq!(stack.transport.ops(), vec!["connect /a /b".to_string()]);
    assert!(stack.transport.is_up("/a", "/b"));

    stack.run("unregister /b");
    stack.settle();
    assert!(!stack.transport.is_up("/a", "/b"));
}

#[test]
fn test_topic_joins_endpoints_once() {
    let stack = Stack::new(AllocatorConfig::default());
    stack.run("topic /t");
    stack.run("subscribe /a /t");
    stack.run("subscribe /t /b");

    stack.run("register /a");
    stack.run("register /b");
    stack.settle();

    assert_eq!(stack.transport.ops(), vec!["connect /a /b".to_string()]);
}

#[test]
fn test_from_mode_pruned_with_source() {
    let stack = Stack::new(AllocatorConfig::default());
    stack.run("subscribe /a /b from");
    stack.run("subscribe /c /d");
    for name in ["/a", "/b", "/c", "/d"] {
        stack.run(&format!("register {}", name));
    }
    stack.settle();

    stack.run("announce /a -1");
    stack.run("announce /c -1");
    stack.settle();

    match stack.run("subscribe") {
        Reply::Subscriptions(list) => {
            assert_eq!(list.len(), 1);
            assert_eq!((list[0].src.as_str(), list[0].dest.as_str()), ("/c", "/d"));
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn test_repeated_connects_coalesce() {
    let transport = Arc::new(FakeTransport::slow(Duration::from_millis(100)));
    let manager = ConnectManager::new(transport.clone(), 4).unwrap();

    for _ in 0..3 {
        manager.connect("/a", "/b");
        assert!(manager.active_jobs() <= 1);
    }
    assert!(manager.wait_idle(Duration::from_secs(5)));

    assert_eq!(transport.ops(), vec!["connect /a /b".to_string()]);
    assert_eq!(manager.pending("/a", "/b"), 0);
}

#[test]
fn test_structured_replies() {
    let stack = Stack::new(AllocatorConfig::default());
    stack.run("register /cam tcp 10.0.0.4 10002");

    let reply = stack
        .service
        .apply_line("query /cam format=json", None);
    assert_eq!(
        reply,
        "port (name /cam) (ip 10.0.0.4) (port_number 10002) (carrier tcp)"
    );

    let reply = stack.service.apply_line("NAME_SERVER query /cam", None);
    assert_eq!(reply, "old (registration name /cam ip 10.0.0.4 port 10002 type tcp)");
}
