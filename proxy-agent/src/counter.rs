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

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative bytes sent (`tx`) and received (`rx`) by every stream an
/// agent hands out.
///
/// The caller creates one and shares it as `Arc<TrafficCounter>`. The
/// counters only ever grow; nothing in this crate resets them.
#[derive(Debug, Default)]
pub struct TrafficCounter {
    tx: AtomicU64,
    rx: AtomicU64,
}

/// Point-in-time copy of a `TrafficCounter`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub tx: u64,
    pub rx: u64,
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, bytes: u64) {
        if bytes > 0 {
            self.tx.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn add_rx(&self, bytes: u64) {
        if bytes > 0 {
            self.rx.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot { tx: self.tx(), rx: self.rx() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counts_accumulate() {
        let counter = TrafficCounter::new();
        counter.add_tx(10);
        counter.add_tx(5);
        counter.add_rx(7);
        counter.add_rx(0);
        assert_eq!(counter.snapshot(), TrafficSnapshot { tx: 15, rx: 7 });
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counter = Arc::new(TrafficCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        counter.add_tx(1);
                        counter.add_rx(2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.tx(), 80_000);
        assert_eq!(counter.rx(), 160_000);
    }
}
