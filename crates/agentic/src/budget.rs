//! Token accounting for agentic executions.

use common::types::CostEstimate;

/// Per-1k-token prices used to estimate the cost of an execution. Cost
/// estimates only appear on results when pricing has been configured.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenPricing {
    pub input_token_price_per_1k: f64,
    pub output_token_price_per_1k: f64,
}

impl TokenPricing {
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> CostEstimate {
        let estimated_cost = input_tokens as f64 / 1000.0 * self.input_token_price_per_1k
            + output_tokens as f64 / 1000.0 * self.output_token_price_per_1k;
        CostEstimate {
            input_tokens,
            output_tokens,
            estimated_cost,
        }
    }
}
