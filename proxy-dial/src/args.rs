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

use clap::Parser;
use proxy_agent::{AgentConfig, TargetDescriptor};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "proxy-dial", version, about = "Open a stream through an optional proxy")]
pub struct DialArgs {
    /// Target as host:port
    pub target: TargetDescriptor,
    /// Proxy URL: http://, https://, socks://, socks4:// or socks5://
    #[arg(short, long, env = "ALL_PROXY")]
    pub proxy: Option<String>,
    /// Upgrade the stream to TLS (server certificates are not verified)
    #[arg(short, long)]
    pub secure: bool,
    /// TLS server name, defaults to the target host
    #[arg(long, requires = "secure")]
    pub sni: Option<String>,
    /// Upper bound on SOCKS negotiation for TLS streams, in seconds
    #[arg(long, default_value_t = 30)]
    pub socks_timeout: u64,
    /// Leave Nagle's algorithm enabled
    #[arg(long)]
    pub no_nodelay: bool,
    /// Set verbose mode
    #[arg(short, long)]
    pub verbose: bool,
}

impl DialArgs {
    pub fn config(&self) -> proxy_agent::Result<AgentConfig> {
        Ok(AgentConfig::new()
            .with_proxy_url(self.proxy.as_deref())?
            .with_socks_timeout(Duration::from_secs(self.socks_timeout))
            .with_nodelay(!self.no_nodelay))
    }

    pub fn target(&self) -> TargetDescriptor {
        match &self.sni {
            Some(sni) => self.target.clone().with_server_name(sni),
            None => self.target.clone(),
        }
    }
}
