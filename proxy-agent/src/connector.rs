// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::TargetDescriptor;
use crate::error::{Error, Result};
use crate::stream::RawStream;
use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const HTTP_VERSION: &str = "1.1";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_RESPONSE_HEADER: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

/// Progress of a single CONNECT attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelState {
    Connecting,
    AwaitingHeaders,
    Established,
    Failed,
    Aborted,
}

impl TunnelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Established | TunnelState::Failed | TunnelState::Aborted)
    }
}

/// Result of feeding one chunk to a `TunnelHandshake`.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    /// The response header is not complete yet.
    Pending,
    /// The proxy answered `200`. Carries any bytes that followed the
    /// header in the same chunk.
    Established(Bytes),
}

/// Response-header scanner for one CONNECT attempt.
///
/// It does no I/O. The caller sends the bytes from `request()` and
/// then feeds every chunk read from the proxy to `on_data()` until a
/// terminal state is reached. Chunk boundaries are arbitrary, so the
/// response is buffered until the blank line ending the header shows
/// up.
#[derive(Debug)]
pub struct TunnelHandshake {
    target: String,
    state: TunnelState,
    buffer: BytesMut,
    // Offset up to which the buffer is known to hold no terminator.
    scanned: usize,
}

impl TunnelHandshake {
    pub fn new(target: &TargetDescriptor) -> Self {
        TunnelHandshake {
            target: target.authority(),
            state: TunnelState::Connecting,
            buffer: BytesMut::new(),
            scanned: 0,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Builds the CONNECT request and starts waiting for the response.
    pub fn request(&mut self) -> String {
        self.state = TunnelState::AwaitingHeaders;
        format!(
            "CONNECT {target} HTTP/{version}\r\nHost: {target}\r\n\r\n",
            target = self.target,
            version = HTTP_VERSION
        )
    }

    /// Feeds one chunk read from the proxy.
    ///
    /// Only valid while `AwaitingHeaders`. In any other state the chunk
    /// is not consumed and `Error::HandshakeNotAwaiting` is returned.
    pub fn on_data(&mut self, chunk: &[u8]) -> Result<Progress> {
        if self.state != TunnelState::AwaitingHeaders {
            return Err(Error::HandshakeNotAwaiting(format!("{:?}", self.state)));
        }
        self.buffer.extend_from_slice(chunk);

        let Some(end) = self.find_terminator() else {
            if self.buffer.len() > MAX_RESPONSE_HEADER {
                self.state = TunnelState::Failed;
                return Err(Error::TunnelRejected {
                    target: self.target.clone(),
                    response: String::from_utf8_lossy(&self.buffer).into_owned(),
                });
            }
            return Ok(Progress::Pending);
        };

        let header = self.buffer.split_to(end + HEADER_TERMINATOR.len());
        self.scanned = 0;
        let response = String::from_utf8_lossy(&header).into_owned();
        if status_code(&response) == Some("200") {
            self.state = TunnelState::Established;
            Ok(Progress::Established(self.buffer.split().freeze()))
        } else {
            self.state = TunnelState::Failed;
            Err(Error::TunnelRejected { target: self.target.clone(), response })
        }
    }

    /// The proxy closed its side before the header was complete.
    pub fn on_eof(&mut self) -> Error {
        self.state = TunnelState::Aborted;
        Error::TunnelClosed
    }

    pub fn on_error(&mut self, err: io::Error) -> Error {
        self.state = TunnelState::Failed;
        Error::IoError(err)
    }

    fn find_terminator(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);
        let found = self.buffer[start..]
            .windows(HEADER_TERMINATOR.len())
            .position(|window| window == HEADER_TERMINATOR)
            .map(|pos| start + pos);
        self.scanned = self.buffer.len();
        found
    }
}

/// Second whitespace-delimited token of the status line.
fn status_code(response: &str) -> Option<&str> {
    response.split("\r\n").next()?.split_whitespace().nth(1)
}

/// Establishes a TCP connection to a target through an HTTP proxy.
///
/// The `Connector` performs the CONNECT handshake. Once the proxy
/// answers `200` the proxy socket itself is the tunnel and is handed
/// to the caller.
#[derive(Clone, Debug)]
pub struct Connector {
    proxy_host: String,
    proxy_port: u16,
    nodelay: bool,
}

impl Connector {
    pub fn new(proxy_host: impl Into<String>, proxy_port: u16) -> Self {
        Connector { proxy_host: proxy_host.into(), proxy_port, nodelay: false }
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub async fn connect(&self, target: &TargetDescriptor) -> Result<RawStream> {
        let mut handshake = TunnelHandshake::new(target);
        let mut stream = match TcpStream::connect((self.proxy_host.as_str(), self.proxy_port)).await
        {
            Ok(stream) => stream,
            Err(err) => return Err(handshake.on_error(err)),
        };
        if self.nodelay {
            stream.set_nodelay(true)?;
        }

        let request = handshake.request();
        debug!("CONNECT {} via {}:{}", target, self.proxy_host, self.proxy_port);
        if let Err(err) = stream.write_all(request.as_bytes()).await {
            return Err(handshake.on_error(err));
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(n) => n,
                Err(err) => return Err(handshake.on_error(err)),
            };
            if n == 0 {
                debug!("Proxy {}:{} closed during CONNECT", self.proxy_host, self.proxy_port);
                return Err(handshake.on_eof());
            }
            match handshake.on_data(&chunk[..n]) {
                Ok(Progress::Pending) => continue,
                Ok(Progress::Established(trailing)) => {
                    debug!("Tunnel to {} established ({} early bytes)", target, trailing.len());
                    return Ok(RawStream::with_pending(stream, trailing));
                }
                Err(err) => {
                    warn!("{}", err);
                    // The socket is dropped right after; a failed shutdown changes nothing.
                    let _ = stream.shutdown().await;
                    return Err(err);
                }
            }
        }
    }
}
