//! A runtime with a controllable clock and deterministic randomness for
//! tests. Advancing the clock is explicit; nothing in the test runtime ever
//! sleeps on real time except `wait`, which tests should avoid in favor of
//! `advance`.

use std::{
    future::Future,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::{
    RngCore,
    SeedableRng,
};
use rand_chacha::ChaCha12Rng;

use super::Runtime;

#[derive(Clone)]
pub struct TestRuntime {
    inner: Arc<TestRuntimeInner>,
}

struct TestRuntimeInner {
    base_system: SystemTime,
    base_monotonic: tokio::time::Instant,
    elapsed: Mutex<Duration>,
    rng: Mutex<ChaCha12Rng>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(TestRuntimeInner {
                // An arbitrary fixed instant so test output is stable:
                // 2023-11-14T22:13:20Z.
                base_system: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
                base_monotonic: tokio::time::Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                rng: Mutex::new(ChaCha12Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.inner.elapsed.lock();
        *elapsed += duration;
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for TestRuntime {
    fn wait(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, _name: &'static str, f: impl Future<Output = ()> + Send + 'static) {
        tokio::spawn(f);
    }

    fn system_time(&self) -> SystemTime {
        self.inner.base_system + *self.inner.elapsed.lock()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        self.inner.base_monotonic + *self.inner.elapsed.lock()
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        // Fork a child generator so successive calls are independent but the
        // whole sequence is reproducible from the seed.
        let mut parent = self.inner.rng.lock();
        let mut seed = [0u8; 32];
        parent.fill_bytes(&mut seed);
        Box::new(ChaCha12Rng::from_seed(seed))
    }
}
