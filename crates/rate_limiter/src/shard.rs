//! Fixed-window counters, one single-writer shard per rate-limit key.

use std::{
    sync::Arc,
    time::Duration,
};

use common::runtime::Runtime;
use parking_lot::Mutex;
use serde::Serialize;

/// Configuration for one limiter category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimiterConfig {
    pub window: Duration,
    pub max_requests: u64,
}

/// One fixed window: how many requests have been admitted and when the
/// window lapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Window {
    count: u64,
    /// Unix milliseconds.
    reset_at: u64,
}

/// The admission decision for one key in one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    /// Unix milliseconds at which the current window lapses.
    pub reset_at: u64,
}

/// The single serialized writer for one key's window state. All operations
/// on the same key go through the same shard; operations on different keys
/// are independent.
#[derive(Debug)]
pub struct Shard<RT: Runtime> {
    runtime: RT,
    window: Mutex<Option<Window>>,
}

impl<RT: Runtime> Shard<RT> {
    pub fn new(runtime: RT) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            window: Mutex::new(None),
        })
    }

    fn now_ms(&self) -> u64 {
        self.runtime.unix_timestamp().as_millis()
    }

    /// Read the current state without admitting anything. An expired or
    /// absent window reads as a fresh one.
    pub fn check(&self, config: &LimiterConfig) -> Decision {
        let now = self.now_ms();
        let window = self.window.lock();
        match *window {
            Some(w) if now < w.reset_at => Decision {
                allowed: w.count < config.max_requests,
                remaining: config.max_requests.saturating_sub(w.count),
                reset_at: w.reset_at,
            },
            _ => Decision {
                allowed: true,
                remaining: config.max_requests,
                reset_at: now + config.window.as_millis() as u64,
            },
        }
    }

    /// Admit one request if the window has capacity. A rejected request
    /// never increments the count.
    pub fn check_and_increment(&self, config: &LimiterConfig) -> Decision {
        let now = self.now_ms();
        let mut window = self.window.lock();
        let w = match *window {
            Some(w) if now < w.reset_at => window.insert(w),
            // Lazily reconstruct after expiry.
            _ => window.insert(Window {
                count: 0,
                reset_at: now + config.window.as_millis() as u64,
            }),
        };
        if w.count < config.max_requests {
            w.count += 1;
            Decision {
                allowed: true,
                remaining: config.max_requests - w.count,
                reset_at: w.reset_at,
            }
        } else {
            Decision {
                allowed: false,
                remaining: 0,
                reset_at: w.reset_at,
            }
        }
    }

    /// Drop the window entirely.
    pub fn reset(&self) {
        *self.window.lock() = None;
    }
}
