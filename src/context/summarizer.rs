//! Budget-driven summarization of upstream responses

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{
    reduction_ratio, DetailsFetch, ReductionMetrics, SummaryEnvelope, SummaryKind, SummaryMeta,
};
use super::projector::{count_fields, essential_fields, field_names, project};
use super::token_estimator::{CharRatioEstimator, TokenEstimator};

/// Input the summarizer cannot turn into an envelope
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SummarizationInputError {
    #[error("expected an object, got a list of {0} items")]
    UnexpectedList(usize),

    #[error("expected an object, got a scalar value")]
    Scalar,
}

/// Decides whether responses need shrinking and builds summaries
pub struct SummarizationService {
    estimator: Arc<dyn TokenEstimator>,
}

impl SummarizationService {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    /// Returns whether `value` exceeds `threshold` and its estimated cost
    pub fn should_summarize(&self, value: &Value, threshold: usize) -> (bool, usize) {
        let estimated = self.estimator.estimate_value(value);
        (estimated > threshold, estimated)
    }

    /// Project an object onto its essential fields (or `fields` when given)
    pub fn summarize(
        &self,
        object: &Map<String, Value>,
        type_tag: &str,
        details_endpoint: &str,
        fields: Option<&[String]>,
    ) -> SummaryEnvelope {
        let summary = match fields {
            Some(fields) => project(object, fields),
            None => project(object, essential_fields(type_tag)),
        };

        let total_field_count = count_fields(&Value::Object(object.clone()));
        let projected_count = count_fields(&Value::Object(summary.clone()));
        let kind = if projected_count >= total_field_count {
            SummaryKind::Full
        } else {
            SummaryKind::Preview
        };

        debug!(
            type_tag,
            total_field_count, projected_count, "built summary envelope"
        );

        SummaryEnvelope {
            meta: SummaryMeta {
                kind,
                total_field_count,
                projected_field_names: field_names(&summary),
                details_fetch: DetailsFetch::full_view(details_endpoint),
            },
            summary,
        }
    }

    /// Project each element of a list independently.
    ///
    /// Non-object elements are kept as they are. The result is a plain
    /// sequence, not wrapped in an envelope.
    pub fn summarize_list(
        &self,
        items: &[Value],
        type_tag: &str,
        fields: Option<&[String]>,
    ) -> Vec<Value> {
        items
            .iter()
            .map(|item| match item {
                Value::Object(object) => Value::Object(match fields {
                    Some(fields) => project(object, fields),
                    None => project(object, essential_fields(type_tag)),
                }),
                other => other.clone(),
            })
            .collect()
    }

    /// Summarize any JSON value.
    ///
    /// Lists should already be paginated before reaching this point, so one
    /// arriving here is logged and projected element by element. Scalars are
    /// returned unchanged.
    pub fn summarize_value(
        &self,
        value: &Value,
        type_tag: &str,
        details_endpoint: &str,
        fields: Option<&[String]>,
    ) -> Value {
        match value {
            Value::Object(object) => self
                .summarize(object, type_tag, details_endpoint, fields)
                .into_value(),
            Value::Array(items) => {
                warn!(
                    endpoint = details_endpoint,
                    error = %SummarizationInputError::UnexpectedList(items.len()),
                    "unpaginated list reached the summarizer"
                );
                Value::Array(self.summarize_list(items, type_tag, fields))
            }
            _ => {
                warn!(
                    endpoint = details_endpoint,
                    error = %SummarizationInputError::Scalar,
                    "returning summarizer input unchanged"
                );
                value.clone()
            }
        }
    }

    /// Field and token reduction achieved by `summary` relative to `original`
    pub fn reduction_metrics(&self, original: &Value, summary: &Value) -> ReductionMetrics {
        ReductionMetrics {
            field_reduction_ratio: reduction_ratio(count_fields(original), count_fields(summary)),
            token_reduction_ratio: reduction_ratio(
                self.estimator.estimate_value(original),
                self.estimator.estimate_value(summary),
            ),
        }
    }
}

impl Default for SummarizationService {
    fn default() -> Self {
        Self::new(Arc::new(CharRatioEstimator::default()))
    }
}
