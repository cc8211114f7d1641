// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client connection handling for the name server.
//!
//! One command per line, one reply line per command.

use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A connected client.
pub struct ClientConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    max_message_size: usize,
    read_buffer: Vec<u8>,
}

impl ClientConnection {
    /// Create a new client connection.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_message_size: usize) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            peer_addr,
            max_message_size,
            read_buffer: Vec::with_capacity(256),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one command line, without its terminator.
    ///
    /// Returns `Ok(None)` if the connection is closed gracefully.
    pub async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        self.read_buffer.clear();
        let limit = self.max_message_size as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.read_buffer)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if self.read_buffer.last() == Some(&b'\n') {
            self.read_buffer.pop();
        }
        if self.read_buffer.last() == Some(&b'\r') {
            self.read_buffer.pop();
        }
        if self.read_buffer.len() > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "Message too large: > {}",
                self.max_message_size
            )));
        }

        let line = std::str::from_utf8(&self.read_buffer)
            .map_err(|e| ConnectionError::Protocol(format!("Invalid UTF-8: {}", e)))?;
        Ok(Some(line.to_string()))
    }

    /// Send one reply line to the client.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Connection error types.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
