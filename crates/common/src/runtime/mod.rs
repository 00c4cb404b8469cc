//! Runtime trait for abstracting away OS-esque features and allowing
//! different implementations for test, dev and prod. Functionality like time
//! and randomness should operate quite differently between test and prod:
//! rate-limit windows and cache TTLs in tests advance a virtual clock
//! instead of sleeping.

use std::{
    future::Future,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use futures::future::BoxFuture;
use rand::RngCore;
use serde::Serialize;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub trait Runtime: Clone + Sync + Send + 'static {
    /// Sleep for the given duration.
    fn wait(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Spawn a future on the runtime's executor.
    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static);

    /// Return (a potentially-virtualized) system time. Compare with
    /// `std::time::UNIX_EPOCH` to obtain a Unix timestamp.
    fn system_time(&self) -> SystemTime;

    fn unix_timestamp(&self) -> UnixTimestamp {
        UnixTimestamp(
            self.system_time()
                .duration_since(UNIX_EPOCH)
                .expect("Failed to compute unix timestamp"),
        )
    }

    /// Return (a potentially-virtualized) reading from a monotonic clock.
    fn monotonic_now(&self) -> tokio::time::Instant;

    /// Use the runtime's source of randomness.
    fn rng(&self) -> Box<dyn RngCore + Send>;
}

/// Abstraction over a unix timestamp. Internally it stores a Duration since
/// the unix epoch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct UnixTimestamp(Duration);

impl UnixTimestamp {
    pub fn from_millis(ms: u64) -> Self {
        UnixTimestamp(Duration::from_millis(ms))
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    pub fn as_nanos(&self) -> u128 {
        self.0.as_nanos()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    pub fn as_system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.0
    }

    pub fn checked_sub(&self, rhs: UnixTimestamp) -> Option<Duration> {
        self.0.checked_sub(rhs.0)
    }

    pub fn saturating_add(&self, rhs: Duration) -> UnixTimestamp {
        UnixTimestamp(self.0.saturating_add(rhs))
    }
}

/// The production runtime: real clocks, OS randomness, tokio tasks.
#[derive(Clone, Default)]
pub struct ProdRuntime;

impl ProdRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Runtime for ProdRuntime {
    fn wait(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static) {
        let span = tracing::info_span!("spawn", task = name);
        tokio::spawn(tracing::Instrument::instrument(f, span));
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        use rand::SeedableRng;
        Box::new(rand::rngs::StdRng::from_os_rng())
    }
}
