//! Monotonic per-process nonce generator (spec §4.1 "Nonce discipline").
//!
//! One instance per process, shared (via `Arc`) by the venue adapters that
//! need it. Seeded with the wall clock in milliseconds; every call returns a
//! value strictly greater than every value returned before it, even under
//! concurrent callers.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct NonceGenerator {
    last: Mutex<u64>,
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(now_ms()),
        }
    }

    pub fn next(&self) -> u64 {
        let mut last = self.last.lock().expect("nonce mutex poisoned");
        let candidate = now_ms().max(*last + 1);
        *last = candidate;
        candidate
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn strictly_increasing_under_concurrency() {
        let gen = Arc::new(NonceGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gen = gen.clone();
            handles.push(thread::spawn(move || {
                (0..200).map(|_| gen.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let mut sorted = all.clone();
        sorted.sort_unstable();
        all.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), all.len(), "nonces must be unique");
    }
}
