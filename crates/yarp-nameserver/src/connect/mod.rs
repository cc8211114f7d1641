// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection brokering.
//!
//! [`ConnectManager`] turns connect/disconnect requests for `(src, dest)`
//! pairs into transport operations on a fixed pool of worker threads.
//!
//! # Coalescing
//!
//! At most one job exists per pair. A request for a pair that already has a
//! job only bumps its pending counter and overwrites the desired polarity,
//! so `connect, disconnect, connect` in quick succession ends in a single
//! connected state. The worker owning a job drains the counter, applies the
//! latest polarity, and repeats until nothing is pending.
//!
//! Transport operations are idempotent: the current state is checked first
//! and nothing is done when it already matches.

pub mod admin;

pub use admin::AdminTransport;

use crate::bottle::BottleError;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot resolve {0}")]
    Resolve(String),

    #[error("Malformed reply: {0}")]
    Bottle(#[from] BottleError),

    #[error("Rejected by {peer}: {reply}")]
    Rejected { peer: String, reply: String },
}

/// Transport-level control of port connections.
pub trait PortTransport: Send + Sync {
    fn is_connected(&self, src: &str, dest: &str) -> Result<bool, TransportError>;
    fn connect(&self, src: &str, dest: &str) -> Result<(), TransportError>;
    fn disconnect(&self, src: &str, dest: &str) -> Result<(), TransportError>;
}

/// Fire-and-forget connection requests.
pub trait Connector: Send + Sync {
    fn connect(&self, src: &str, dest: &str);
    fn disconnect(&self, src: &str, dest: &str);
}

/// Send one command line to `address` and read one reply line.
pub fn send_line(address: &str, line: &str, timeout: Duration) -> Result<String, TransportError> {
    let addr = address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::Resolve(address.to_string()))?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    Ok(reply.trim_end().to_string())
}

/// Desired end state of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Connect,
    Disconnect,
}

type Pair = (String, String);

#[derive(Debug)]
struct Job {
    pending: usize,
    polarity: Polarity,
}

struct Shared {
    jobs: Mutex<HashMap<Pair, Job>>,
    idle: Condvar,
    transport: Arc<dyn PortTransport>,
}

impl Shared {
    /// Take the latest request for `key`, or retire the job if none is left.
    fn next_polarity(&self, key: &Pair) -> Option<Polarity> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(key) {
            Some(job) if job.pending > 0 => {
                job.pending = 0;
                Some(job.polarity)
            }
            _ => {
                jobs.remove(key);
                if jobs.is_empty() {
                    self.idle.notify_all();
                }
                None
            }
        }
    }

    fn execute(&self, (src, dest): &Pair, polarity: Polarity) {
        let want = polarity == Polarity::Connect;
        match self.transport.is_connected(src, dest) {
            Ok(state) if state == want => {
                debug!("{} -> {} already in desired state", src, dest);
            }
            Ok(_) => {
                let result = if want {
                    self.transport.connect(src, dest)
                } else {
                    self.transport.disconnect(src, dest)
                };
                match result {
                    Ok(()) if want => info!("Connected {} -> {}", src, dest),
                    Ok(()) => info!("Disconnected {} -> {}", src, dest),
                    Err(e) => warn!("{:?} {} -> {} failed: {}", polarity, src, dest, e),
                }
            }
            Err(e) => warn!("Cannot inspect {} -> {}: {}", src, dest, e),
        }
    }

    fn worker_loop(&self, rx: Receiver<Pair>) {
        for key in rx.iter() {
            while let Some(polarity) = self.next_polarity(&key) {
                self.execute(&key, polarity);
            }
        }
    }
}

/// Bounded worker pool applying connection requests.
pub struct ConnectManager {
    shared: Arc<Shared>,
    tx: Option<Sender<Pair>>,
    workers: Vec<JoinHandle<()>>,
}

impl ConnectManager {
    /// Start `workers` threads (at least one) over `transport`.
    pub fn new(transport: Arc<dyn PortTransport>, workers: usize) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            idle: Condvar::new(),
            transport,
        });
        let (tx, rx) = channel::unbounded::<Pair>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("yarp-connect-{}", i))
                .spawn(move || shared.worker_loop(rx))?;
            handles.push(handle);
        }
        debug!("Connect manager started with {} workers", handles.len());

        Ok(Self {
            shared,
            tx: Some(tx),
            workers: handles,
        })
    }

    fn request(&self, src: &str, dest: &str, polarity: Polarity) {
        let key = (src.to_string(), dest.to_string());
        let mut jobs = self.shared.jobs.lock();
        if let Some(job) = jobs.get_mut(&key) {
            job.pending += 1;
            job.polarity = polarity;
            debug!("{:?} {} -> {} coalesced ({} pending)", polarity, src, dest, job.pending);
            return;
        }
        jobs.insert(key.clone(), Job { pending: 1, polarity });
        drop(jobs);

        let sent = self.tx.as_ref().map(|tx| tx.send(key.clone()).is_ok());
        if sent != Some(true) {
            warn!("Connect workers gone, dropping {:?} {} -> {}", polarity, src, dest);
            self.shared.jobs.lock().remove(&key);
        }
    }

    /// Requests not yet picked up for a pair.
    pub fn pending(&self, src: &str, dest: &str) -> usize {
        self.shared
            .jobs
            .lock()
            .get(&(src.to_string(), dest.to_string()))
            .map(|j| j.pending)
            .unwrap_or(0)
    }

    /// Pairs currently owned by a worker or queued for one.
    pub fn active_jobs(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    /// Block until every job has finished; false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.shared.jobs.lock();
        while !jobs.is_empty() {
            if self.shared.idle.wait_until(&mut jobs, deadline).timed_out() {
                return jobs.is_empty();
            }
        }
        true
    }
}

impl Connector for ConnectManager {
    fn connect(&self, src: &str, dest: &str) {
        self.request(src, dest, Polarity::Connect);
    }

    fn disconnect(&self, src: &str, dest: &str) {
        self.request(src, dest, Polarity::Disconnect);
    }
}

impl Drop for ConnectManager {
    fn drop(&mut self) {
        // Closing the channel lets workers finish the queue and exit
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Connect worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;

    /// In-memory transport whose operations block until the gate is opened.
    struct GatedTransport {
        links: Mutex<HashSet<Pair>>,
        connects: Mutex<usize>,
        disconnects: Mutex<usize>,
        open: Mutex<bool>,
        opened: Condvar,
        entered: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl GatedTransport {
        fn new(open: bool) -> (Arc<Self>, mpsc::Receiver<()>) {
            let (tx, rx) = mpsc::channel();
            let t = Arc::new(Self {
                links: Mutex::new(HashSet::new()),
                connects: Mutex::new(0),
                disconnects: Mutex::new(0),
                open: Mutex::new(open),
                opened: Condvar::new(),
                entered: Mutex::new(Some(tx)),
            });
            (t, rx)
        }

        fn release(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }

        fn gate(&self) {
            if let Some(tx) = self.entered.lock().as_ref() {
                let _ = tx.send(());
            }
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }

        fn key(src: &str, dest: &str) -> Pair {
            (src.to_string(), dest.to_string())
        }
    }

    impl PortTransport for GatedTransport {
        fn is_connected(&self, src: &str, dest: &str) -> Result<bool, TransportError> {
            Ok(self.links.lock().contains(&Self::key(src, dest)))
        }

        fn connect(&self, src: &str, dest: &str) -> Result<(), TransportError> {
            self.gate();
            *self.connects.lock() += 1;
            self.links.lock().insert(Self::key(src, dest));
            Ok(())
        }

        fn disconnect(&self, src: &str, dest: &str) -> Result<(), TransportError> {
            self.gate();
            *self.disconnects.lock() += 1;
            self.links.lock().remove(&Self::key(src, dest));
            Ok(())
        }
    }

    #[test]
    fn test_repeated_connect_coalesces() {
        let (transport, entered) = GatedTransport::new(false);
        let manager = ConnectManager::new(transport.clone(), 4).unwrap();

        manager.connect("/a", "/b");
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        // First request is in flight; these only bump the counter
        manager.connect("/a", "/b");
        manager.connect("/a", "/b");
        assert_eq!(manager.active_jobs(), 1);
        assert_eq!(manager.pending("/a", "/b"), 2);

        transport.release();
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert_eq!(*transport.connects.lock(), 1);
        assert_eq!(manager.pending("/a", "/b"), 0);
        assert!(transport.is_connected("/a", "/b").unwrap());
    }

    #[test]
    fn test_latest_polarity_wins() {
        let (transport, entered) = GatedTransport::new(false);
        let manager = ConnectManager::new(transport.clone(), 2).unwrap();

        manager.connect("/a", "/b");
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        manager.disconnect("/a", "/b");

        transport.release();
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert!(!transport.is_connected("/a", "/b").unwrap());
        assert_eq!(*transport.connects.lock(), 1);
        assert_eq!(*transport.disconnects.lock(), 1);
    }

    #[test]
    fn test_disconnect_when_not_connected_is_noop() {
        let (transport, _entered) = GatedTransport::new(true);
        let manager = ConnectManager::new(transport.clone(), 1).unwrap();
        manager.disconnect("/x", "/y");
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert_eq!(*transport.disconnects.lock(), 0);
    }

    #[test]
    fn test_distinct_pairs_run_independently() {
        let (transport, _entered) = GatedTransport::new(true);
        let manager = ConnectManager::new(transport.clone(), 3).unwrap();
        for i in 0..10 {
            manager.connect(&format!("/src{}", i), "/sink");
        }
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert_eq!(*transport.connects.lock(), 10);
        assert_eq!(manager.active_jobs(), 0);
    }

    #[test]
    fn test_drop_joins_workers() {
        let (transport, _entered) = GatedTransport::new(true);
        let manager = ConnectManager::new(transport.clone(), 2).unwrap();
        manager.connect("/a", "/b");
        drop(manager);
        assert!(transport.is_connected("/a", "/b").unwrap());
    }
}
