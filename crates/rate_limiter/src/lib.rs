//! Distributed fixed-window rate limiting shared by every stateless
//! front-end: one single-writer shard per key, routed by a multi-category
//! client, with the 429 response surface clients key off.

mod client;
pub mod http;
mod metrics;
mod shard;

pub use client::{
    AggregateDecision,
    CategoryDecision,
    RateLimiterClient,
};
pub use shard::{
    Decision,
    LimiterConfig,
    Shard,
};
