//! Slow query log analysis: parsing, query-shape normalization and
//! per-pattern / per-hour aggregation.

pub mod aggregator;
pub mod classifier;
pub mod error;
pub mod fingerprint;
pub mod issues;
pub mod parser;
pub mod report;
pub mod timeline;

use aggregator::{QueryGroup, Summary};
use issues::IssueReport;
use parser::LogEntry;
use std::collections::BTreeMap;
use timeline::TimeBucket;
use tracing::debug;

pub use error::{DigestError, Result};

/// Result of one analysis pass over a complete entry list.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub entries: Vec<LogEntry>,
    pub groups: BTreeMap<String, QueryGroup>,
    pub summary: Summary,
}

impl Analysis {
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        let groups = aggregator::group_by_shape(&entries);
        let summary = aggregator::summarize(&entries);
        debug!(entries = entries.len(), patterns = groups.len(), "analysis complete");
        Self {
            entries,
            groups,
            summary,
        }
    }

    /// Parses and analyzes a whole log held in memory.
    pub fn from_log(text: &str) -> Self {
        Self::from_entries(parser::parse_log_str(text))
    }

    pub fn timeline(&self) -> Vec<TimeBucket> {
        timeline::bucket_by_hour(&self.entries)
    }

    /// Issue report for the group keyed by `normalized_query`.
    pub fn issues(&self, normalized_query: &str) -> Option<IssueReport> {
        self.groups
            .get(normalized_query)
            .map(|group| issues::analyze_issues(&group.members))
    }
}
