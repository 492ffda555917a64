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

//! This module defines the proxy agent error types.

use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// An enumeration of possible errors.
///
/// Nothing in this crate retries. Errors coming from the network, the
/// SOCKS client or the TLS handshake are carried unchanged so the caller
/// can decide on its own retry policy.
#[derive(Debug, Error)]
pub enum Error {
    /// The proxy or target could not be reached, or the socket failed.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    /// The proxy answered CONNECT with something other than `200`.
    #[error("Proxy refused tunnel to {target}: {}", .response.trim_end())]
    TunnelRejected { target: String, response: String },
    /// The proxy hung up before the CONNECT response header was complete.
    #[error("Proxy connection closed before the CONNECT response was complete")]
    TunnelClosed,
    /// `TunnelHandshake::on_data` was called outside `AwaitingHeaders`.
    #[error("CONNECT handshake is not awaiting headers (state {0})")]
    HandshakeNotAwaiting(String),
    #[error("TLS handshake failed: {0}")]
    TlsError(io::Error),
    #[error("TLS configuration error: {0}")]
    TlsConfigError(rustls::Error),
    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),
    #[error("SOCKS error: {0}")]
    SocksError(#[from] tokio_socks::Error),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid proxy configuration string")]
    MalformedConfigString,
    #[error("Invalid port number")]
    InvalidPortNumber,
    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}
