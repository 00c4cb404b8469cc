//! Routes `(category, key)` pairs onto the owning shard and aggregates
//! admission decisions across categories.

use std::{
    collections::HashMap,
    sync::Arc,
};

use common::{
    knobs,
    runtime::Runtime,
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    metrics::{
        log_request_allowed,
        log_request_rejected,
    },
    shard::{
        Decision,
        LimiterConfig,
        Shard,
    },
};

/// Lazily-populated shard pool for one category. The mapping from key to
/// shard is deterministic: the shard is named by the key.
#[derive(Debug)]
struct ShardPool<RT: Runtime> {
    runtime: RT,
    shards: Mutex<HashMap<String, Arc<Shard<RT>>>>,
}

impl<RT: Runtime> ShardPool<RT> {
    fn new(runtime: RT) -> Self {
        Self {
            runtime,
            shards: Mutex::new(HashMap::new()),
        }
    }

    fn shard(&self, key: &str) -> Arc<Shard<RT>> {
        let mut shards = self.shards.lock();
        shards
            .entry(key.to_string())
            .or_insert_with(|| Shard::new(self.runtime.clone()))
            .clone()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDecision {
    pub category: String,
    #[serde(flatten)]
    pub decision: Decision,
}

/// The aggregate of per-category decisions for one request. `allowed` is
/// the conjunction; `blocking_category` is the first category, in declared
/// order, that rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_category: Option<String>,
    pub results: Vec<CategoryDecision>,
}

impl AggregateDecision {
    /// The decision of the blocking category, when the aggregate rejected.
    pub fn blocking_decision(&self) -> Option<&Decision> {
        let blocking = self.blocking_category.as_deref()?;
        self.results
            .iter()
            .find(|r| r.category == blocking)
            .map(|r| &r.decision)
    }
}

/// A multi-category rate limiter shared by every request on a front-end.
/// Categories are consulted in declaration order.
pub struct RateLimiterClient<RT: Runtime> {
    categories: Vec<(String, LimiterConfig)>,
    pools: HashMap<String, ShardPool<RT>>,
}

impl<RT: Runtime> RateLimiterClient<RT> {
    pub fn new(runtime: RT, categories: Vec<(String, LimiterConfig)>) -> Self {
        let pools = categories
            .iter()
            .map(|(name, _)| (name.clone(), ShardPool::new(runtime.clone())))
            .collect();
        Self { categories, pools }
    }

    /// The standard front-end policy: a per-IP limiter followed by a
    /// per-function limiter.
    pub fn with_default_policy(runtime: RT) -> Self {
        Self::new(
            runtime,
            vec![
                (
                    "ip".to_string(),
                    LimiterConfig {
                        window: *knobs::RATE_LIMIT_IP_WINDOW,
                        max_requests: *knobs::RATE_LIMIT_IP_MAX_REQUESTS,
                    },
                ),
                (
                    "function".to_string(),
                    LimiterConfig {
                        window: *knobs::RATE_LIMIT_FUNCTION_WINDOW,
                        max_requests: *knobs::RATE_LIMIT_FUNCTION_MAX_REQUESTS,
                    },
                ),
            ],
        )
    }

    pub fn reset_key(&self, category: &str, key: &str) {
        if let Some(pool) = self.pools.get(category) {
            pool.shard(key).reset();
        }
    }

    /// Query every configured category without admitting anything.
    pub fn check_all(&self, keys: &HashMap<String, String>) -> AggregateDecision {
        let mut results = Vec::new();
        let mut blocking_category = None;
        for (category, config) in &self.categories {
            let Some(key) = keys.get(category) else {
                continue;
            };
            let decision = self.pools[category].shard(key).check(config);
            if !decision.allowed && blocking_category.is_none() {
                blocking_category = Some(category.clone());
            }
            results.push(CategoryDecision {
                category: category.clone(),
                decision,
            });
        }
        AggregateDecision {
            allowed: blocking_category.is_none(),
            blocking_category,
            results,
        }
    }

    /// Admit a request across every configured category, in declared order.
    /// The first rejection halts the sequence: subsequent categories are
    /// not incremented, so a blocked request never consumes downstream
    /// budget.
    pub fn check_and_increment_all(&self, keys: &HashMap<String, String>) -> AggregateDecision {
        let mut results = Vec::new();
        let mut blocking_category = None;
        for (category, config) in &self.categories {
            let Some(key) = keys.get(category) else {
                continue;
            };
            let decision = self.pools[category].shard(key).check_and_increment(config);
            let allowed = decision.allowed;
            results.push(CategoryDecision {
                category: category.clone(),
                decision,
            });
            if !allowed {
                tracing::debug!("Rate limit rejection in category {category} for key {key:?}");
                log_request_rejected(category);
                blocking_category = Some(category.clone());
                break;
            }
            log_request_allowed(category);
        }
        AggregateDecision {
            allowed: blocking_category.is_none(),
            blocking_category,
            results,
        }
    }
}
