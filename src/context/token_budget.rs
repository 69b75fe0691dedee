//! Budget and pagination policy values
//!
//! A [`BudgetPolicy`] is the global default. A [`PolicyOverride`] carries
//! only the fields an endpoint pattern wants to change; merging happens per
//! field, so an override that sets just `max_page_size` keeps the global
//! threshold.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global token budget and pagination policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetPolicy {
    /// Estimated tokens above which a response is summarized
    #[serde(rename = "output_token_threshold", default = "default_threshold_tokens")]
    pub threshold_tokens: usize,

    /// Absolute ceiling, enforced even when summarization is off
    #[serde(rename = "hard_output_token_cap", default = "default_hard_cap_tokens")]
    pub hard_cap_tokens: usize,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(rename = "enable_summarization", default = "default_enabled")]
    pub summarization_enabled: bool,

    #[serde(rename = "enable_pagination", default = "default_enabled")]
    pub pagination_enabled: bool,
}

fn default_threshold_tokens() -> usize {
    2000
}

fn default_hard_cap_tokens() -> usize {
    10000
}

fn default_page_size() -> usize {
    20
}

fn default_max_page_size() -> usize {
    100
}

fn default_enabled() -> bool {
    true
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            threshold_tokens: default_threshold_tokens(),
            hard_cap_tokens: default_hard_cap_tokens(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            summarization_enabled: default_enabled(),
            pagination_enabled: default_enabled(),
        }
    }
}

impl BudgetPolicy {
    /// Validate that the policy is internally consistent
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.hard_cap_tokens < self.threshold_tokens {
            return Err(BudgetError::CapBelowThreshold {
                hard_cap: self.hard_cap_tokens,
                threshold: self.threshold_tokens,
            });
        }

        if self.default_page_size == 0 {
            return Err(BudgetError::ZeroPageSize);
        }

        if self.max_page_size < self.default_page_size {
            return Err(BudgetError::MaxPageBelowDefault {
                max: self.max_page_size,
                default: self.default_page_size,
            });
        }

        Ok(())
    }

    /// Apply an override on top of this policy, field by field
    pub fn merged_with(&self, over: &PolicyOverride) -> EffectivePolicy {
        EffectivePolicy {
            threshold_tokens: over.threshold_tokens.unwrap_or(self.threshold_tokens),
            hard_cap_tokens: over.hard_cap_tokens.unwrap_or(self.hard_cap_tokens),
            default_page_size: over.default_page_size.unwrap_or(self.default_page_size),
            max_page_size: over.max_page_size.unwrap_or(self.max_page_size),
            summarization_enabled: over
                .summarization_enabled
                .unwrap_or(self.summarization_enabled),
            pagination_enabled: over.pagination_enabled.unwrap_or(self.pagination_enabled),
        }
    }
}

/// Partial policy keyed by an endpoint pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    #[serde(rename = "output_token_threshold", default)]
    pub threshold_tokens: Option<usize>,

    #[serde(rename = "hard_output_token_cap", default)]
    pub hard_cap_tokens: Option<usize>,

    #[serde(default)]
    pub default_page_size: Option<usize>,

    #[serde(default)]
    pub max_page_size: Option<usize>,

    #[serde(rename = "enable_summarization", default)]
    pub summarization_enabled: Option<bool>,

    #[serde(rename = "enable_pagination", default)]
    pub pagination_enabled: Option<bool>,
}

impl PolicyOverride {
    pub fn is_empty(&self) -> bool {
        self == &PolicyOverride::default()
    }
}

/// Policy in force for one route after merging overrides onto the global default
pub type EffectivePolicy = BudgetPolicy;

/// Budget policy errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BudgetError {
    #[error("hard cap ({hard_cap}) is below the summarization threshold ({threshold})")]
    CapBelowThreshold { hard_cap: usize, threshold: usize },

    #[error("max page size ({max}) is below the default page size ({default})")]
    MaxPageBelowDefault { max: usize, default: usize },

    #[error("default page size must be at least 1")]
    ZeroPageSize,
}
