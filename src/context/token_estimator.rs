//! Token estimation without a tokenizer
//!
//! Responses are priced with a fixed characters-per-token ratio plus a
//! safety margin, so estimates err on the high side. An unnecessary
//! summarization is cheap; an oversized response is not.

use serde_json::Value;

/// Token estimator trait for different estimation strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }

    /// Estimate the cost of a value in its compact JSON wire form
    fn estimate_value(&self, value: &Value) -> usize {
        match serde_json::to_string(value) {
            Ok(text) => self.estimate(&text),
            // Value serialization only fails on non-string map keys, which
            // serde_json::Value cannot hold
            Err(_) => 0,
        }
    }
}

/// Fixed-ratio estimator (4 characters per token, +20% margin)
#[derive(Debug, Clone)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
    safety_margin: f64,
}

impl CharRatioEstimator {
    pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;
    pub const DEFAULT_SAFETY_MARGIN: f64 = 0.2;

    /// Create an estimator with a custom ratio and margin.
    ///
    /// A ratio of zero is treated as one character per token and a negative
    /// margin as no margin.
    pub fn new(chars_per_token: usize, safety_margin: f64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            safety_margin: safety_margin.max(0.0),
        }
    }

    /// Base estimate before the safety margin is applied
    pub fn base_estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token)
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHARS_PER_TOKEN, Self::DEFAULT_SAFETY_MARGIN)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        let base = self.base_estimate(text);
        if base == 0 {
            return 0;
        }
        let margin = (base as f64 * self.safety_margin).ceil() as usize;
        base + margin
    }
}
