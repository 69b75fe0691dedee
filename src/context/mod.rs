//! Context-window protection: token estimation, budgets and summarization
//!
//! Every JSON response leaving the gateway is priced in estimated LLM tokens
//! and, when it exceeds the route's budget, shrunk to its essential fields
//! with a pointer back to the full object.

pub mod models;
pub mod projector;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use models::{DetailsFetch, ReductionMetrics, SummaryEnvelope, SummaryKind, SummaryMeta};
pub use projector::{count_fields, essential_fields, project, type_tag_for_path};
pub use summarizer::{SummarizationInputError, SummarizationService};
pub use token_budget::{BudgetError, BudgetPolicy, EffectivePolicy, PolicyOverride};
pub use token_estimator::{CharRatioEstimator, TokenEstimator};
