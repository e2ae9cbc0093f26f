use converge_config::PricingSettings;
use converge_core::CostEstimate;
use std::time::Instant;
use tracing::debug;

const TOKENS_PER_WORD: f64 = 1.3;

/// Word-count token heuristic shared by input seeding and output
/// accumulation.
pub fn estimate_tokens(text: &str) -> f64 {
    text.split_whitespace().count() as f64 * TOKENS_PER_WORD
}

/// Dollar cost for the given token estimates under `pricing`.
pub fn estimated_cost(pricing: &PricingSettings, input_tokens: f64, output_tokens: f64) -> f64 {
    input_tokens / 1000.0 * pricing.input_per_1k + output_tokens / 1000.0 * pricing.output_per_1k
}

/// Accumulates a cost estimate over one message stream.
///
/// Seed it before streaming begins, feed it every rendered message, and
/// finish it once the stream is exhausted. The estimate covers exactly the
/// messages observed in that run.
pub struct CostEstimator {
    pricing: PricingSettings,
    input_tokens: f64,
    output_tokens: f64,
    messages_seen: usize,
    started: Instant,
}

impl CostEstimator {
    /// Seeds the input estimate from the texts sent to the backend and
    /// starts the wall clock.
    pub fn start(pricing: PricingSettings, system_prompt: &str, prompt: &str) -> Self {
        let input_tokens = estimate_tokens(system_prompt) + estimate_tokens(prompt);
        debug!(input_tokens, "seeded input token estimate");

        Self {
            pricing,
            input_tokens,
            output_tokens: 0.0,
            messages_seen: 0,
            started: Instant::now(),
        }
    }

    /// Record one rendered message from the stream.
    pub fn observe(&mut self, rendered: &str) {
        self.output_tokens += estimate_tokens(rendered);
        self.messages_seen += 1;
    }

    pub fn messages_seen(&self) -> usize {
        self.messages_seen
    }

    /// Finalize the estimate. `None` when the stream yielded no messages.
    pub fn finish(self) -> Option<CostEstimate> {
        if self.messages_seen == 0 {
            return None;
        }

        Some(CostEstimate {
            estimated_input_tokens: self.input_tokens,
            estimated_output_tokens: self.output_tokens,
            total_estimated_cost: estimated_cost(
                &self.pricing,
                self.input_tokens,
                self.output_tokens,
            ),
            duration_seconds: self.started.elapsed().as_secs_f64(),
        })
    }
}
