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

use crate::counter::TrafficCounter;
use hyper_util::client::legacy::connect::{Connected, Connection};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// When a `MeteredStream` reports to its `TrafficCounter`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accounting {
    /// Every completed read and write is added immediately.
    Live,
    /// Totals are kept on the stream and added when it is shut down or
    /// dropped.
    OnClose,
}

// Byte totals of one stream and how far they have been reported.
#[derive(Debug)]
struct Meter {
    counter: Arc<TrafficCounter>,
    accounting: Accounting,
    written: u64,
    read: u64,
    reported_written: u64,
    reported_read: u64,
}

impl Meter {
    fn on_write(&mut self, n: usize) {
        self.written += n as u64;
        if self.accounting == Accounting::Live {
            self.report();
        }
    }

    fn on_read(&mut self, n: usize) {
        self.read += n as u64;
        if self.accounting == Accounting::Live {
            self.report();
        }
    }

    // Adds whatever has not been reported yet, so repeated calls never
    // count a byte twice.
    fn report(&mut self) {
        self.counter.add_tx(self.written - self.reported_written);
        self.counter.add_rx(self.read - self.reported_read);
        self.reported_written = self.written;
        self.reported_read = self.read;
    }
}

impl Drop for Meter {
    fn drop(&mut self) {
        self.report();
    }
}

/// Stream decorator that feeds a shared `TrafficCounter`.
///
/// Reads and writes are forwarded untouched: the same buffers, the same
/// return values, the same `Pending` results. Only the byte counts of
/// completed operations are observed.
#[derive(Debug)]
pub struct MeteredStream<S> {
    inner: S,
    meter: Meter,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, counter: Arc<TrafficCounter>, accounting: Accounting) -> Self {
        MeteredStream {
            inner,
            meter: Meter {
                counter,
                accounting,
                written: 0,
                read: 0,
                reported_written: 0,
                reported_read: 0,
            },
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Reports any outstanding totals and returns the wrapped stream.
    /// Traffic on the returned stream is no longer counted.
    pub fn into_inner(self) -> S {
        let MeteredStream { inner, mut meter } = self;
        meter.report();
        inner
    }

    pub fn accounting(&self) -> Accounting {
        self.meter.accounting
    }

    /// Bytes written through this stream so far.
    pub fn bytes_written(&self) -> u64 {
        self.meter.written
    }

    /// Bytes read through this stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.meter.read
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for MeteredStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let n = buf.filled().len() - before;
            self.meter.on_read(n);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeteredStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.meter.on_write(n);
        }
        poll
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = poll {
            self.meter.on_write(n);
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_shutdown(cx);
        if poll.is_ready() {
            self.meter.report();
        }
        poll
    }
}

impl<S: Connection> Connection for MeteredStream<S> {
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}
