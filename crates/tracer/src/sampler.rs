//! Sampling strategies. Custom samplers implement [`Sampler`]; the
//! probabilistic default lives in the tracer itself.

use common::runtime::Runtime;
use parking_lot::Mutex;

use crate::span::Attributes;

/// What a sampler sees when deciding: the ids resolved for the new span.
#[derive(Clone, Debug)]
pub struct SamplingContext {
    pub trace_id: String,
    pub parent_span_id: Option<String>,
}

/// A sampling decision, optionally stamping attributes onto the new span
/// (eg which rule matched).
#[derive(Clone, Debug, Default)]
pub struct SamplingDecision {
    pub sampled: bool,
    pub attributes: Attributes,
}

impl SamplingDecision {
    pub fn sample() -> Self {
        Self {
            sampled: true,
            attributes: Attributes::new(),
        }
    }

    pub fn drop_span() -> Self {
        Self {
            sampled: false,
            attributes: Attributes::new(),
        }
    }
}

pub trait Sampler: Send + Sync {
    fn sample(&self, context: &SamplingContext, name: &str) -> SamplingDecision;
}

impl<F> Sampler for F
where
    F: Fn(&SamplingContext, &str) -> SamplingDecision + Send + Sync,
{
    fn sample(&self, context: &SamplingContext, name: &str) -> SamplingDecision {
        self(context, name)
    }
}

struct BucketState {
    tokens: f64,
    last_refill: tokio::time::Instant,
}

/// Token-bucket sampler: admits at most `max_spans_per_second` on average,
/// with bursts up to the same amount. The bucket never exceeds capacity, and
/// every sampled decision consumes one token.
pub struct RateLimitingSampler<RT: Runtime> {
    runtime: RT,
    max_spans_per_second: f64,
    state: Mutex<BucketState>,
}

impl<RT: Runtime> RateLimitingSampler<RT> {
    pub fn new(runtime: RT, max_spans_per_second: f64) -> Self {
        let state = BucketState {
            tokens: max_spans_per_second,
            last_refill: runtime.monotonic_now(),
        };
        Self {
            runtime,
            max_spans_per_second,
            state: Mutex::new(state),
        }
    }
}

impl<RT: Runtime> Sampler for RateLimitingSampler<RT> {
    fn sample(&self, _context: &SamplingContext, _name: &str) -> SamplingDecision {
        let now = self.runtime.monotonic_now();
        let mut state = self.state.lock();
        let elapsed = (now - state.last_refill).as_secs_f64();
        state.tokens =
            (state.tokens + elapsed * self.max_spans_per_second).min(self.max_spans_per_second);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            SamplingDecision::sample()
        } else {
            SamplingDecision::drop_span()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::runtime::testing::TestRuntime;

    use super::*;

    fn context() -> SamplingContext {
        SamplingContext {
            trace_id: "a".repeat(32),
            parent_span_id: None,
        }
    }

    fn sampled_count(sampler: &RateLimitingSampler<TestRuntime>, attempts: usize) -> usize {
        (0..attempts)
            .filter(|_| sampler.sample(&context(), "op").sampled)
            .count()
    }

    #[test]
    fn test_burst_capacity_then_rejection() {
        let rt = TestRuntime::new();
        let sampler = RateLimitingSampler::new(rt, 5.0);
        assert_eq!(sampled_count(&sampler, 20), 5);
    }

    #[test]
    fn test_refill_is_proportional_to_elapsed_time() {
        let rt = TestRuntime::new();
        let sampler = RateLimitingSampler::new(rt.clone(), 5.0);
        assert_eq!(sampled_count(&sampler, 10), 5);
        rt.advance(Duration::from_millis(400));
        // 0.4s at 5/s refills 2 tokens.
        assert_eq!(sampled_count(&sampler, 10), 2);
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let rt = TestRuntime::new();
        let sampler = RateLimitingSampler::new(rt.clone(), 3.0);
        rt.advance(Duration::from_secs(3600));
        assert_eq!(sampled_count(&sampler, 100), 3);
    }

    #[test]
    fn test_closure_sampler() {
        let sampler = |_ctx: &SamplingContext, name: &str| {
            if name.starts_with("health") {
                SamplingDecision::drop_span()
            } else {
                SamplingDecision::sample()
            }
        };
        assert!(!Sampler::sample(&sampler, &context(), "healthz").sampled);
        assert!(Sampler::sample(&sampler, &context(), "invoke").sampled);
    }
}
