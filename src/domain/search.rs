use std::fmt;

use serde::{Deserialize, Serialize};

use super::lead::LeadRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub modifiers: Vec<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, modifiers: Vec<String>) -> Self {
        SearchRequest {
            query: query.into(),
            modifiers,
        }
    }

    /// A request without modifiers is a single unmodified segment.
    pub fn segments(&self) -> Vec<String> {
        match self.modifiers.is_empty() {
            true => vec![String::new()],
            false => self.modifiers.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    Parallel,
    #[serde(alias = "deep", alias = "sequential")]
    SequentialThrottled,
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyMode::Parallel => write!(f, "parallel"),
            ConcurrencyMode::SequentialThrottled => write!(f, "sequential_throttled"),
        }
    }
}

/// What happens to a run when a segment stays rate limited after its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPolicy {
    /// The segment contributes nothing and the run continues.
    Isolate,
    /// The run fails with a quota error.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub leads: Vec<LeadRecord>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_segments: Vec<SegmentFailure>,
}

impl AggregationResult {
    pub fn new(
        leads: Vec<LeadRecord>,
        sources: Vec<GroundingSource>,
        failed_segments: Vec<SegmentFailure>,
        segment_count: usize,
    ) -> Self {
        let count = leads.len();
        let summary = match count {
            0 => "No leads found. Try a broader search term.".to_string(),
            n => format!(
                "Merged {} unique business records from {} segments.",
                n, segment_count
            ),
        };

        AggregationResult {
            leads,
            count,
            summary: Some(summary),
            sources,
            failed_segments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseStarted {
        index: usize,
        total: usize,
        label: String,
    },
    PhaseCompleted {
        index: usize,
        total: usize,
        label: String,
        segment_leads: usize,
        accepted_total: usize,
    },
}

pub fn segment_label(modifier: &str) -> String {
    match modifier.trim().is_empty() {
        true => "base query".to_string(),
        false => modifier.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{segment_label, AggregationResult, ConcurrencyMode, SearchRequest};

    #[test]
    fn request_without_modifiers_has_one_segment() {
        let request = SearchRequest::new("IT companies in Ahmedabad", vec![]);

        assert_eq!(request.segments(), vec![String::new()]);
    }

    #[test]
    fn mode_accepts_deep_alias() {
        let mode: ConcurrencyMode = serde_json::from_str(r#""deep""#).unwrap();
        assert_eq!(mode, ConcurrencyMode::SequentialThrottled);

        let mode: ConcurrencyMode = serde_json::from_str(r#""parallel""#).unwrap();
        assert_eq!(mode, ConcurrencyMode::Parallel);
    }

    #[test]
    fn empty_result_suggests_broadening() {
        let result = AggregationResult::new(vec![], vec![], vec![], 3);

        assert_eq!(result.count, 0);
        assert!(result.summary.unwrap().contains("broader"));
    }

    #[test]
    fn blank_modifier_is_the_base_query() {
        assert_eq!(segment_label("  "), "base query");
        assert_eq!(segment_label(" B2B portals "), "B2B portals");
    }
}
