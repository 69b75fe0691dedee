//! Data models for response summarization

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether a summary dropped any fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Preview,
    Full,
}

/// Where the consumer fetches the unabridged object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailsFetch {
    pub endpoint: String,
    pub parameters: Map<String, Value>,
}

impl DetailsFetch {
    /// Drill-down pointer that asks the gateway for the full view
    pub fn full_view(endpoint: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("full".to_string(), Value::String("true".to_string()));
        Self {
            endpoint: endpoint.into(),
            parameters,
        }
    }
}

/// Metadata attached to a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMeta {
    pub kind: SummaryKind,
    pub total_field_count: usize,
    pub projected_field_names: Vec<String>,
    pub details_fetch: DetailsFetch,
}

/// Summary of one upstream object plus drill-down metadata.
///
/// Built fresh for each response and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEnvelope {
    pub summary: Map<String, Value>,
    pub meta: SummaryMeta,
}

impl SummaryEnvelope {
    pub fn into_value(self) -> Value {
        // Serializing maps, strings and integers cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// How much a summary shrank its source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionMetrics {
    pub field_reduction_ratio: f64,
    pub token_reduction_ratio: f64,
}

/// `1 - reduced/original`, clamped to `[0, 1]` and zero for an empty original
pub fn reduction_ratio(original: usize, reduced: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - reduced as f64 / original as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reduction_ratio_bounds() {
        assert_eq!(reduction_ratio(0, 0), 0.0);
        assert_eq!(reduction_ratio(0, 5), 0.0);
        assert_eq!(reduction_ratio(10, 20), 0.0);
        assert!((reduction_ratio(10, 4) - 0.6).abs() < 1e-9);
        assert_eq!(reduction_ratio(10, 0), 1.0);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = SummaryEnvelope {
            summary: json!({"id": 1}).as_object().cloned().unwrap(),
            meta: SummaryMeta {
                kind: SummaryKind::Preview,
                total_field_count: 4,
                projected_field_names: vec!["id".to_string()],
                details_fetch: DetailsFetch::full_view("/api/v1/bookings/1"),
            },
        };
        let value = envelope.into_value();
        assert_eq!(value["meta"]["kind"], "preview");
        assert_eq!(value["meta"]["details_fetch"]["parameters"]["full"], "true");
        assert_eq!(value["summary"]["id"], 1);
    }
}
