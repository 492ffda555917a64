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

use crate::config::{AgentConfig, TargetDescriptor};
use crate::counter::TrafficCounter;
use crate::error::{Error, Result};
use crate::establish::Establisher;
use crate::metered::{Accounting, MeteredStream};
use crate::socks::{SocksClient, TokioSocks};
use crate::stream::RawStream;
use crate::tls::TlsUpgrader;
use futures::future::{self, BoxFuture, FutureExt};
use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;
use tower_service::Service;

/// Produces connected streams for a pooling client.
///
/// Every call runs one full connection attempt and completes through
/// the returned future, whether or not a proxy is configured.
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn dial(&self, target: TargetDescriptor) -> BoxFuture<'static, Result<Self::Stream>>;
}

pub type AgentStream = MeteredStream<RawStream>;

/// Plain TCP agent. Every read and write on the streams it returns is
/// added to the shared `TrafficCounter` as it happens.
#[derive(Clone, Debug)]
pub struct Agent {
    establisher: Arc<Establisher>,
    counter: Arc<TrafficCounter>,
}

impl Agent {
    pub fn new(config: &AgentConfig, counter: Arc<TrafficCounter>) -> Self {
        Self::with_socks_client(config, counter, Arc::new(TokioSocks))
    }

    pub fn with_socks_client(
        config: &AgentConfig,
        counter: Arc<TrafficCounter>,
        socks: Arc<dyn SocksClient>,
    ) -> Self {
        let establisher = Establisher::new(config.proxy.clone(), socks).nodelay(config.nodelay);
        Agent { establisher: Arc::new(establisher), counter }
    }

    pub fn counter(&self) -> &Arc<TrafficCounter> {
        &self.counter
    }
}

impl Dialer for Agent {
    type Stream = AgentStream;

    fn dial(&self, target: TargetDescriptor) -> BoxFuture<'static, Result<AgentStream>> {
        let establisher = self.establisher.clone();
        let counter = self.counter.clone();
        async move {
            let raw = establisher.establish(&target).await?;
            Ok(MeteredStream::new(raw, counter, Accounting::Live))
        }
        .boxed()
    }
}

/// TLS stream returned by `SecureAgent`.
///
/// Traffic is counted on the transport under TLS, so record framing
/// and handshake bytes are included. The totals reach the
/// `TrafficCounter` once the stream is shut down or dropped.
pub struct SecureStream {
    inner: TlsStream<AgentStream>,
}

impl SecureStream {
    pub fn get_ref(&self) -> &TlsStream<AgentStream> {
        &self.inner
    }

    /// The metered transport below TLS.
    pub fn transport(&self) -> &AgentStream {
        self.inner.get_ref().0
    }
}

impl fmt::Debug for SecureStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SecureStream").field("transport", self.transport()).finish()
    }
}

impl AsyncRead for SecureStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Connection for SecureStream {
    fn connected(&self) -> Connected {
        self.transport().connected()
    }
}

/// TLS agent. Establishes the transport like `Agent`, bounds SOCKS
/// negotiation by `AgentConfig::socks_timeout`, then runs a TLS
/// handshake with the target's server name.
#[derive(Clone, Debug)]
pub struct SecureAgent {
    establisher: Arc<Establisher>,
    upgrader: TlsUpgrader,
    counter: Arc<TrafficCounter>,
}

impl SecureAgent {
    pub fn new(config: &AgentConfig, counter: Arc<TrafficCounter>) -> Result<Self> {
        Self::with_socks_client(config, counter, Arc::new(TokioSocks))
    }

    pub fn with_socks_client(
        config: &AgentConfig,
        counter: Arc<TrafficCounter>,
        socks: Arc<dyn SocksClient>,
    ) -> Result<Self> {
        let establisher = Establisher::new(config.proxy.clone(), socks)
            .socks_timeout(Some(config.socks_timeout))
            .nodelay(config.nodelay);
        let upgrader = TlsUpgrader::new()?;
        Ok(SecureAgent { establisher: Arc::new(establisher), upgrader, counter })
    }

    pub fn counter(&self) -> &Arc<TrafficCounter> {
        &self.counter
    }
}

impl Dialer for SecureAgent {
    type Stream = SecureStream;

    fn dial(&self, target: TargetDescriptor) -> BoxFuture<'static, Result<SecureStream>> {
        let establisher = self.establisher.clone();
        let upgrader = self.upgrader.clone();
        let counter = self.counter.clone();
        async move {
            let raw = establisher.establish(&target).await?;
            let transport = MeteredStream::new(raw, counter, Accounting::OnClose);
            let inner = upgrader.upgrade(transport, target.server_name()).await?;
            Ok(SecureStream { inner })
        }
        .boxed()
    }
}

fn dial_uri<D: Dialer>(dialer: &D, uri: Uri) -> BoxFuture<'static, Result<TokioIo<D::Stream>>> {
    match TargetDescriptor::from_uri(&uri) {
        Ok(target) => dialer.dial(target).map(|result| result.map(TokioIo::new)).boxed(),
        Err(err) => future::ready(Err::<TokioIo<D::Stream>, Error>(err)).boxed(),
    }
}

impl Service<Uri> for Agent {
    type Response = TokioIo<AgentStream>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        dial_uri(&*self, uri)
    }
}

impl Service<Uri> for SecureAgent {
    type Response = TokioIo<SecureStream>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        dial_uri(&*self, uri)
    }
}
