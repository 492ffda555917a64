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

//! # Proxy Agent
//!
//! This crate opens outbound TCP streams directly, through a SOCKS4 or
//! SOCKS5 proxy, or through an HTTP CONNECT tunnel, optionally upgrades
//! them to TLS, and counts the bytes every stream sends and receives
//! in a shared `TrafficCounter`.
//!
//! `Agent` (plain) and `SecureAgent` (TLS) are the entry points. Both
//! implement `Dialer` and `tower_service::Service<http::Uri>`, so they
//! can be handed to the hyper-util pooling client as its connector.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use proxy_agent::{Agent, AgentConfig, TrafficCounter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), proxy_agent::Error> {
//!     let config = AgentConfig::new().with_proxy_url(Some("socks5://127.0.0.1:1080"))?;
//!     let counter = Arc::new(TrafficCounter::new());
//!     let agent = Agent::new(&config, counter.clone());
//!     let client = config.client_builder().build::<_, http_body_util::Empty<bytes::Bytes>>(agent);
//!     Ok(())
//! }
//! ```
//!
//! ## Limitations
//!
//! * A single proxy hop; no chains and no fallback to direct.
//! * No proxy authentication.
//! * TLS server certificates are not verified.

mod agent;
mod config;
mod connector;
mod counter;
mod direct;
mod error;
mod establish;
mod metered;
mod socks;
mod stream;
mod tls;

pub use agent::*;
pub use config::*;
pub use connector::*;
pub use counter::*;
pub use error::{Error, Result};
pub use establish::*;
pub use metered::*;
pub use socks::{
    SocksClient, SocksCommand, SocksDestination, SocksProxy, SocksRequest, SocksVersion, TokioSocks,
};
pub use stream::*;
pub use tls::*;
