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

//! SOCKS delegation.
//!
//! The SOCKS protocol itself lives behind the `SocksClient` trait. This
//! crate only describes the request and hands it over; `TokioSocks` is
//! the stock client backed by `tokio-socks`.

use crate::config::{ProxyDescriptor, ProxyScheme, TargetDescriptor};
use crate::error::{Error, Result};
use crate::stream::RawStream;
use futures::future::{BoxFuture, FutureExt};
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocksVersion {
    V4,
    V5,
}

impl SocksVersion {
    pub fn number(&self) -> u8 {
        match self {
            SocksVersion::V4 => 4,
            SocksVersion::V5 => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocksCommand {
    Connect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksProxy {
    pub host: String,
    pub port: u16,
    pub version: SocksVersion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksDestination {
    pub host: String,
    pub port: u16,
}

/// Everything a SOCKS client needs for one negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksRequest {
    pub proxy: SocksProxy,
    pub destination: SocksDestination,
    pub command: SocksCommand,
    pub timeout: Option<Duration>,
}

impl SocksRequest {
    /// Describes a CONNECT through `proxy` to `target`.
    ///
    /// Returns `None` when `proxy` is not a SOCKS proxy.
    pub fn connect(
        proxy: &ProxyDescriptor,
        target: &TargetDescriptor,
        timeout: Option<Duration>,
    ) -> Option<SocksRequest> {
        let version = match proxy.scheme() {
            ProxyScheme::Socks4 => SocksVersion::V4,
            ProxyScheme::Socks5 => SocksVersion::V5,
            ProxyScheme::Http | ProxyScheme::Https => return None,
        };
        Some(SocksRequest {
            proxy: SocksProxy {
                host: proxy.host().to_string(),
                port: proxy.port_or_default(),
                version,
            },
            destination: SocksDestination { host: target.host.clone(), port: target.port },
            command: SocksCommand::Connect,
            timeout,
        })
    }
}

/// A SOCKS4/SOCKS5 protocol client.
///
/// On success the returned stream is already connected to the
/// destination. Errors are reported as the client produced them.
pub trait SocksClient: Send + Sync {
    fn connect(&self, request: SocksRequest) -> BoxFuture<'static, Result<TcpStream>>;
}

/// `SocksClient` backed by the `tokio-socks` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSocks;

impl SocksClient for TokioSocks {
    fn connect(&self, request: SocksRequest) -> BoxFuture<'static, Result<TcpStream>> {
        async move {
            let negotiate = async {
                let proxy = (request.proxy.host.as_str(), request.proxy.port);
                let destination = (request.destination.host.as_str(), request.destination.port);
                let stream = match (request.proxy.version, request.command) {
                    (SocksVersion::V4, SocksCommand::Connect) => {
                        Socks4Stream::connect(proxy, destination).await?.into_inner()
                    }
                    (SocksVersion::V5, SocksCommand::Connect) => {
                        Socks5Stream::connect(proxy, destination).await?.into_inner()
                    }
                };
                Ok::<_, Error>(stream)
            };
            match request.timeout {
                Some(limit) => {
                    tokio::time::timeout(limit, negotiate).await.map_err(|_| Error::Timeout(limit))?
                }
                None => negotiate.await,
            }
        }
        .boxed()
    }
}

/// Connects to `target` through a SOCKS proxy using `client`.
pub async fn connect(
    client: &dyn SocksClient,
    request: SocksRequest,
    nodelay: bool,
) -> Result<RawStream> {
    debug!(
        "SOCKS{} connect to {}:{} via {}:{}",
        request.proxy.version.number(),
        request.destination.host,
        request.destination.port,
        request.proxy.host,
        request.proxy.port
    );
    let stream = client.connect(request).await?;
    if nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(RawStream::new(stream))
}
