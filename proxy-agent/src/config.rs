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

// # Proxy Agent Configuration
//
// `ProxyDescriptor` holds a parsed proxy URL. `TargetDescriptor`
// names the final destination of one connection. `AgentConfig`
// collects everything an `Agent` or `SecureAgent` is built from,
// including the pool options that are only handed through to the
// hyper-util client builder.

use crate::error::{Error, Result};
use http::Uri;
use hyper_util::client::legacy::{Builder, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Upper bound on SOCKS negotiation for secure connections.
pub const DEFAULT_SOCKS_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    /// Maps a URL scheme to a proxy kind.
    ///
    /// Bare `socks` means SOCKS4. Any other scheme starting with
    /// `socks` is treated as SOCKS5.
    fn parse(scheme: &str) -> Result<Self> {
        let scheme = scheme.to_ascii_lowercase();
        match scheme.as_str() {
            "http" => Ok(ProxyScheme::Http),
            "https" => Ok(ProxyScheme::Https),
            "socks" | "socks4" => Ok(ProxyScheme::Socks4),
            s if s.starts_with("socks") => Ok(ProxyScheme::Socks5),
            _ => Err(Error::UnsupportedScheme(scheme)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyScheme::Socks4 | ProxyScheme::Socks5)
    }

    /// Port used when the proxy URL does not name one.
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyScheme::Http => 80,
            ProxyScheme::Https => 443,
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => 1080,
        }
    }
}

/// A single proxy hop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyDescriptor {
    scheme: ProxyScheme,
    host: String,
    port: Option<u16>,
}

impl ProxyDescriptor {
    pub fn new(scheme: ProxyScheme, host: impl Into<String>, port: Option<u16>) -> Self {
        ProxyDescriptor { scheme, host: host.into(), port }
    }

    /// Parses a proxy URL and returns a `ProxyDescriptor`.
    ///
    /// The expected format is
    ///
    /// ```text
    /// [scheme://]host[:port]
    /// ```
    ///
    /// where:
    ///
    /// * `scheme`: one of `http`, `https`, `socks`, `socks4`,
    ///   `socks5`. If not provided, defaults to `http`.
    /// * `host`: a host name or IP address. IPv6 addresses must be
    ///   enclosed in square brackets (e.g. "[::1]").
    /// * `port`: the port the proxy listens on.
    ///
    /// Host names are kept as given and resolved when dialing.
    ///
    /// # Errors
    /// Returns an `Error` if the string is not in a valid format, the
    /// port does not fit in 16 bits or the scheme is not supported.
    ///
    /// # Limitations
    /// Credentials (`user:pass@`) are not accepted.
    pub fn from_string(config_string: &str) -> Result<ProxyDescriptor> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(concat!(
                r"^(?:(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*)://)?",
                r"(?P<host>[\w\.-]+|\[[0-9A-Fa-f:\.]+\])",
                r"(?::(?P<port>\d+))?/?$",
            ))
            .expect("proxy url pattern")
        });
        let caps = re.captures(config_string.trim()).ok_or(Error::MalformedConfigString)?;

        let scheme = match caps.name("scheme") {
            Some(m) => ProxyScheme::parse(m.as_str())?,
            None => ProxyScheme::Http,
        };

        // Extract host, removing surrounding brackets if present
        let host = caps
            .name("host")
            .ok_or(Error::MalformedConfigString)?
            .as_str()
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();

        let port = caps
            .name("port")
            .map(|m| m.as_str().parse::<u16>().map_err(|_| Error::InvalidPortNumber))
            .transpose()?;

        Ok(ProxyDescriptor { scheme, host, port })
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The configured port, or the scheme's well-known port.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }
}

impl FromStr for ProxyDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProxyDescriptor::from_string(s)
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), authority(&self.host, self.port_or_default()))
    }
}

/// Final destination of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub host: String,
    pub port: u16,
    /// TLS server name, when it differs from `host`.
    pub server_name: Option<String>,
}

impl TargetDescriptor {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TargetDescriptor { host: host.into(), port, server_name: None }
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Name sent in the TLS handshake.
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }

    /// `host:port`, with IPv6 hosts in brackets.
    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    /// Derives a target from a request URI the way a pooling client
    /// hands it over. Missing ports default by URI scheme.
    pub fn from_uri(uri: &Uri) -> Result<TargetDescriptor> {
        let host = uri
            .host()
            .ok_or_else(|| Error::InvalidTarget(uri.to_string()))?
            .trim_matches(|c| c == '[' || c == ']');
        let port = match uri.port_u16() {
            Some(port) => port,
            None if uri.scheme_str() == Some("https") => 443,
            None => 80,
        };
        Ok(TargetDescriptor::new(host, port))
    }
}

impl FromStr for TargetDescriptor {
    type Err = Error;

    /// Parses `host:port` or `[v6addr]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTarget(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_matches(|c| c == '[' || c == ']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| Error::InvalidPortNumber)?;
        Ok(TargetDescriptor::new(host, port))
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Settings for `Agent` and `SecureAgent`.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub proxy: Option<ProxyDescriptor>,
    /// Bound on SOCKS negotiation. Only the secure agent applies it.
    pub socks_timeout: Duration,
    pub nodelay: bool,
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            proxy: None,
            socks_timeout: DEFAULT_SOCKS_TIMEOUT,
            nodelay: true,
            pool_idle_timeout: Some(DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: usize::MAX,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and sets the proxy. `None` or an empty string means direct.
    pub fn with_proxy_url(mut self, proxy_url: Option<&str>) -> Result<Self> {
        self.proxy = match proxy_url.map(str::trim) {
            Some(url) if !url.is_empty() => Some(ProxyDescriptor::from_string(url)?),
            _ => None,
        };
        Ok(self)
    }

    pub fn with_proxy(mut self, proxy: Option<ProxyDescriptor>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_socks_timeout(mut self, timeout: Duration) -> Self {
        self.socks_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.pool_max_idle_per_host = max_idle;
        self
    }

    /// A hyper-util client builder carrying the pool options.
    ///
    /// Pass an `Agent` or `SecureAgent` to `build()` on the result.
    pub fn client_builder(&self) -> Builder {
        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host);
        builder
    }
}
