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
use crate::error::Result;
use crate::stream::RawStream;
use log::debug;
use tokio::net::TcpStream;

/// Opens a TCP connection straight to the target.
pub async fn connect(target: &TargetDescriptor, nodelay: bool) -> Result<RawStream> {
    debug!("Connecting directly to {}", target);
    let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
    if nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(RawStream::new(stream))
}
