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

use crate::config::{ProxyDescriptor, TargetDescriptor};
use crate::connector::Connector;
use crate::direct;
use crate::error::Result;
use crate::socks::{self, SocksClient, SocksRequest};
use crate::stream::RawStream;
use log::debug;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which dialer a connection attempt goes through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Direct,
    Socks(SocksRequest),
    HttpTunnel { proxy_host: String, proxy_port: u16 },
}

/// Picks the dialer from the proxy alone and runs exactly that one.
pub struct Establisher {
    proxy: Option<ProxyDescriptor>,
    socks: Arc<dyn SocksClient>,
    socks_timeout: Option<Duration>,
    nodelay: bool,
}

impl Establisher {
    pub fn new(proxy: Option<ProxyDescriptor>, socks: Arc<dyn SocksClient>) -> Self {
        Establisher { proxy, socks, socks_timeout: None, nodelay: false }
    }

    pub fn socks_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socks_timeout = timeout;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn route(&self, target: &TargetDescriptor) -> Route {
        let Some(proxy) = &self.proxy else {
            return Route::Direct;
        };
        if let Some(request) = SocksRequest::connect(proxy, target, self.socks_timeout) {
            return Route::Socks(request);
        }
        debug_assert!(!proxy.scheme().is_socks());
        Route::HttpTunnel {
            proxy_host: proxy.host().to_string(),
            proxy_port: proxy.port_or_default(),
        }
    }

    /// Produces a stream connected to `target`. Errors from the chosen
    /// dialer are returned as is.
    pub async fn establish(&self, target: &TargetDescriptor) -> Result<RawStream> {
        let route = self.route(target);
        debug!("Route to {}: {:?}", target, route);
        match route {
            Route::Direct => direct::connect(target, self.nodelay).await,
            Route::Socks(request) => {
                socks::connect(self.socks.as_ref(), request, self.nodelay).await
            }
            Route::HttpTunnel { proxy_host, proxy_port } => {
                Connector::new(proxy_host, proxy_port).nodelay(self.nodelay).connect(target).await
            }
        }
    }
}

impl fmt::Debug for Establisher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Establisher")
            .field("proxy", &self.proxy)
            .field("socks_timeout", &self.socks_timeout)
            .field("nodelay", &self.nodelay)
            .finish()
    }
}
