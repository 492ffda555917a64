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

//! Command line tool that dials a target through proxy-agent and pipes
//! stdin/stdout over the resulting stream.

mod args;
mod logger;

use anyhow::Context;
use args::DialArgs;
use clap::Parser;
use log::{info, warn};
use proxy_agent::{Agent, Dialer, SecureAgent, TrafficCounter};
use std::sync::Arc;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copies stdin to the stream and the stream to stdout until both
/// directions are finished.
async fn pump<S>(stream: S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = io::split(stream);
    let upload = async {
        let sent = io::copy(&mut io::stdin(), &mut writer).await?;
        writer.shutdown().await?;
        Ok::<u64, std::io::Error>(sent)
    };
    let download = async {
        let mut stdout = io::stdout();
        let received = io::copy(&mut reader, &mut stdout).await?;
        stdout.flush().await?;
        Ok::<u64, std::io::Error>(received)
    };
    let (sent, received) = tokio::try_join!(upload, download).context("stream copy failed")?;
    info!("Payload sent: {} bytes, received: {} bytes", sent, received);
    // Dropping both halves reports any bytes still held by on-close accounting.
    drop(reader);
    drop(writer);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DialArgs::parse();
    logger::init("proxy-dial", args.verbose);

    let config = args.config().context("invalid proxy configuration")?;
    let target = args.target();
    match &config.proxy {
        Some(proxy) => info!("Dialing {} via {}", target, proxy),
        None => info!("Dialing {} directly", target),
    }

    let counter = Arc::new(TrafficCounter::new());
    let (result, traffic) = if args.secure {
        let agent = SecureAgent::new(&config, counter)?;
        let stream = agent.dial(target.clone()).await.with_context(|| format!("dial {}", target))?;
        (pump(stream).await, agent.counter().snapshot())
    } else {
        let agent = Agent::new(&config, counter);
        let stream = agent.dial(target.clone()).await.with_context(|| format!("dial {}", target))?;
        (pump(stream).await, agent.counter().snapshot())
    };
    if let Err(e) = &result {
        warn!("{:#}", e);
    }

    info!("Traffic tx: {} bytes, rx: {} bytes", traffic.tx, traffic.rx);
    result
}
