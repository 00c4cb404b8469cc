//! The environment a sandboxed execution sees: clocks, randomness, resource
//! budgets, visible globals, and guarded network access.
//!
//! In deterministic mode the clock freezes at a fixed epoch and the RNG is
//! seeded from the sandbox policy (falling back to the code's content hash),
//! so repeated invocations of the same code with the same input produce
//! identical outputs.

use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

use anyhow::Context;
use common::{
    runtime::{
        Runtime,
        UnixTimestamp,
    },
    sha256::Sha256Digest,
    types::SandboxPolicy,
    url_guard::validate_outbound_url,
};
use errors::ErrorMetadata;
use parking_lot::Mutex;
use rand::{
    RngCore,
    SeedableRng,
};
use rand_chacha::ChaCha12Rng;
use url::Url;

/// Fixed clock reading for deterministic sandboxes: 2020-01-01T00:00:00Z.
const DETERMINISTIC_EPOCH_MS: u64 = 1_577_836_800_000;

enum EnvRng {
    Seeded(Mutex<ChaCha12Rng>),
    Os(Mutex<Box<dyn RngCore + Send>>),
}

pub struct SandboxEnvironment {
    deterministic: bool,
    fixed_time: Option<UnixTimestamp>,
    live_clock: Box<dyn Fn() -> UnixTimestamp + Send + Sync>,
    rng: EnvRng,
    memory_limit_bytes: Option<u64>,
    memory_used: AtomicU64,
    cpu_limit_ms: Option<u64>,
    cpu_used_ms: AtomicU64,
    allowed_globals: Option<Vec<String>>,
    network_enabled: bool,
    network_allowlist: Vec<String>,
}

impl SandboxEnvironment {
    pub fn new<RT: Runtime>(
        runtime: &RT,
        policy: &SandboxPolicy,
        content_hash: &Sha256Digest,
    ) -> Self {
        let rng = if policy.deterministic {
            let seed = policy.seed.unwrap_or_else(|| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&content_hash[..8]);
                u64::from_le_bytes(bytes)
            });
            EnvRng::Seeded(Mutex::new(ChaCha12Rng::seed_from_u64(seed)))
        } else {
            EnvRng::Os(Mutex::new(runtime.rng()))
        };
        let clock_runtime = runtime.clone();
        Self {
            deterministic: policy.deterministic,
            fixed_time: policy
                .deterministic
                .then(|| UnixTimestamp::from_millis(DETERMINISTIC_EPOCH_MS)),
            live_clock: Box::new(move || clock_runtime.unix_timestamp()),
            rng,
            memory_limit_bytes: policy.memory_limit_bytes,
            memory_used: AtomicU64::new(0),
            cpu_limit_ms: policy.cpu_time_limit_ms,
            cpu_used_ms: AtomicU64::new(0),
            allowed_globals: policy.allowed_globals.clone(),
            network_enabled: policy.network_enabled,
            network_allowlist: policy.network_allowlist.clone(),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    /// The sandbox's wall clock. Frozen in deterministic mode.
    pub fn now(&self) -> UnixTimestamp {
        match self.fixed_time {
            Some(fixed) => fixed,
            None => (self.live_clock)(),
        }
    }

    /// The sandbox's random source. Seeded in deterministic mode.
    pub fn random_u64(&self) -> u64 {
        match &self.rng {
            EnvRng::Seeded(rng) => rng.lock().next_u64(),
            EnvRng::Os(rng) => rng.lock().next_u64(),
        }
    }

    pub fn random_f64(&self) -> f64 {
        // 53 mantissa bits, the same construction JS engines use.
        (self.random_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Charge an allocation against the memory budget.
    pub fn track_allocation(&self, bytes: u64) -> anyhow::Result<()> {
        let used = self.memory_used.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(limit) = self.memory_limit_bytes {
            if used > limit {
                anyhow::bail!(ErrorMetadata::memory_exceeded(format!(
                    "memory limit exceeded: used {used} of {limit} bytes"
                )));
            }
        }
        Ok(())
    }

    /// Charge compute time against the CPU budget.
    pub fn charge_cpu(&self, ms: u64) -> anyhow::Result<()> {
        let used = self.cpu_used_ms.fetch_add(ms, Ordering::SeqCst) + ms;
        if let Some(limit) = self.cpu_limit_ms {
            if used > limit {
                anyhow::bail!(ErrorMetadata::cpu_exceeded(format!(
                    "cpu time limit exceeded: used {used}ms of {limit}ms"
                )));
            }
        }
        Ok(())
    }

    pub fn memory_used_bytes(&self) -> u64 {
        self.memory_used.load(Ordering::SeqCst)
    }

    pub fn cpu_time_ms(&self) -> u64 {
        self.cpu_used_ms.load(Ordering::SeqCst)
    }

    /// Whether a global name is visible inside the sandbox. With no
    /// allowlist configured, everything is visible.
    pub fn global_allowed(&self, name: &str) -> bool {
        match &self.allowed_globals {
            Some(allowed) => allowed.iter().any(|g| g == name),
            None => true,
        }
    }

    /// Gate one outbound fetch from inside the sandbox: the policy must
    /// enable networking, the exact host must be allowlisted, and the URL
    /// guard must admit the target.
    pub fn check_fetch(&self, url: &str) -> anyhow::Result<()> {
        if !self.network_enabled {
            anyhow::bail!(ErrorMetadata::bad_request(
                "NetworkDisabled",
                "network access is not enabled for this sandbox",
            ));
        }
        let parsed = Url::parse(url).context("unparseable fetch url").map_err(|e| {
            e.context(ErrorMetadata::bad_request(
                "InvalidFetchUrl",
                format!("{url:?} is not a valid URL"),
            ))
        })?;
        let host = parsed.host_str().unwrap_or_default();
        if !self.network_allowlist.iter().any(|allowed| allowed == host) {
            anyhow::bail!(ErrorMetadata::bad_request(
                "HostNotAllowlisted",
                format!("host {host:?} is not on the sandbox network allowlist"),
            ));
        }
        let decision = validate_outbound_url(url);
        if !decision.allowed {
            anyhow::bail!(ErrorMetadata::bad_request(
                "UnsafeFetchUrl",
                decision
                    .reason
                    .unwrap_or_else(|| "refused by the url guard".to_string()),
            ));
        }
        Ok(())
    }
}
