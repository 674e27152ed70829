use crate::classifier::{classify, StatementType};
use crate::parser::LogEntry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Group key used for entries whose normalized text is empty.
pub const UNKNOWN_SHAPE: &str = "unknown";

/// Aggregated statistics for one query shape.
#[derive(Debug, Clone, Serialize)]
pub struct QueryGroup {
    pub normalized_query: String,
    pub count: u64,
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub avg_time: f64,
    pub total_lock_time: f64,
    pub total_rows_sent: u64,
    pub total_rows_examined: u64,
    pub max_rows_examined: u64,
    pub avg_rows_examined: f64,
    pub statement_type: StatementType,
    /// Member executions in log order.
    #[serde(skip)]
    pub members: Vec<LogEntry>,
}

impl QueryGroup {
    fn new(normalized_query: String, statement_type: StatementType) -> Self {
        Self {
            normalized_query,
            count: 0,
            total_time: 0.0,
            min_time: f64::INFINITY,
            max_time: 0.0,
            avg_time: 0.0,
            total_lock_time: 0.0,
            total_rows_sent: 0,
            total_rows_examined: 0,
            max_rows_examined: 0,
            avg_rows_examined: 0.0,
            statement_type,
            members: Vec::new(),
        }
    }

    fn add(&mut self, entry: &LogEntry) {
        let time = entry.query_secs();
        self.count += 1;
        self.total_time += time;
        self.max_time = self.max_time.max(time);
        self.min_time = self.min_time.min(time);
        self.total_lock_time += entry.lock_secs();
        self.total_rows_sent += entry.sent();
        self.total_rows_examined += entry.examined();
        self.max_rows_examined = self.max_rows_examined.max(entry.examined());
        self.members.push(entry.clone());
    }

    fn finalize(&mut self) {
        if self.count > 0 {
            self.avg_time = self.total_time / self.count as f64;
            self.avg_rows_examined = self.total_rows_examined as f64 / self.count as f64;
        }
    }

    /// Stable identifier of the shape: md5 of the normalized text.
    pub fn query_id(&self) -> String {
        format!("{:x}", md5::compute(&self.normalized_query))
    }

    pub fn avg_lock_time(&self) -> f64 {
        if self.count > 0 {
            self.total_lock_time / self.count as f64
        } else {
            0.0
        }
    }

    /// Rows examined per row sent over the whole group.
    pub fn examine_ratio(&self) -> f64 {
        if self.total_rows_sent > 0 {
            self.total_rows_examined as f64 / self.total_rows_sent as f64
        } else {
            0.0
        }
    }

    /// Nearest-rank percentile of member query times, `p` in `0.0..=1.0`.
    pub fn percentile(&self, p: f64) -> f64 {
        let mut times: Vec<f64> = self.members.iter().map(LogEntry::query_secs).collect();
        times.sort_by(f64::total_cmp);
        percentile(&times, p)
    }

    /// Slowest member; the earliest one wins ties.
    pub fn worst_example(&self) -> Option<&LogEntry> {
        self.members.iter().reduce(|worst, entry| {
            if entry.query_secs() > worst.query_secs() {
                entry
            } else {
                worst
            }
        })
    }

    pub fn first_seen(&self) -> Option<&str> {
        self.members.first().map(|e| e.timestamp.as_str())
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.members.last().map(|e| e.timestamp.as_str())
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * p).ceil() as usize;
    let idx = idx.saturating_sub(1);
    sorted[idx.min(sorted.len() - 1)]
}

fn shape_key(entry: &LogEntry) -> &str {
    if entry.normalized_query.is_empty() {
        UNKNOWN_SHAPE
    } else {
        &entry.normalized_query
    }
}

/// Groups entries by normalized query shape.
pub fn group_by_shape(entries: &[LogEntry]) -> BTreeMap<String, QueryGroup> {
    let mut groups: BTreeMap<String, QueryGroup> = BTreeMap::new();

    for entry in entries {
        let key = shape_key(entry);
        let group = groups.entry(key.to_string()).or_insert_with(|| {
            QueryGroup::new(key.to_string(), classify(&entry.normalized_query))
        });
        group.add(entry);
    }

    // Averages come from the totals, never from running means.
    for group in groups.values_mut() {
        group.finalize();
    }

    groups
}

/// Dataset-wide totals. `avg_time` and `max_time` are `None` for an empty log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_queries: usize,
    pub unique_queries: usize,
    pub total_time: f64,
    pub avg_time: Option<f64>,
    pub max_time: Option<f64>,
    pub total_rows_examined: u64,
}

pub fn summarize(entries: &[LogEntry]) -> Summary {
    let total_queries = entries.len();
    let unique_queries = entries.iter().map(shape_key).collect::<BTreeSet<_>>().len();
    let total_time: f64 = entries.iter().map(LogEntry::query_secs).sum();
    let max_time = entries.iter().map(LogEntry::query_secs).reduce(f64::max);
    let avg_time = if total_queries > 0 {
        Some(total_time / total_queries as f64)
    } else {
        None
    };

    Summary {
        total_queries,
        unique_queries,
        total_time,
        avg_time,
        max_time,
        total_rows_examined: entries.iter().map(LogEntry::examined).sum(),
    }
}

/// Ranking key for pattern listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RankBy {
    /// Total time spent
    Total,
    /// Average time per execution
    Avg,
    /// Number of executions
    Count,
    /// Slowest single execution
    Max,
}

/// Orders groups by `by` descending, ties by normalized text.
pub fn ranked(groups: &BTreeMap<String, QueryGroup>, by: RankBy, limit: usize) -> Vec<&QueryGroup> {
    let metric = |g: &QueryGroup| match by {
        RankBy::Total => g.total_time,
        RankBy::Avg => g.avg_time,
        RankBy::Count => g.count as f64,
        RankBy::Max => g.max_time,
    };

    let mut list: Vec<&QueryGroup> = groups.values().collect();
    // BTreeMap iteration is already in key order, so a stable sort keeps ties sorted.
    list.sort_by(|a, b| metric(b).total_cmp(&metric(a)));
    list.truncate(limit);
    list
}

/// Executions per statement type.
pub fn type_distribution(groups: &BTreeMap<String, QueryGroup>) -> BTreeMap<StatementType, u64> {
    let mut types = BTreeMap::new();
    for group in groups.values() {
        *types.entry(group.statement_type).or_insert(0) += group.count;
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_log_str;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    const TWO_ORDERS: &str = "# Time: 240105 14:03:11
# Query_time: 12.5  Lock_time: 0.001 Rows_sent: 1  Rows_examined: 500000
SELECT * FROM orders WHERE id = 42;
# Time: 240105 14:05:00
# Query_time: 0.8  Lock_time: 0.000 Rows_sent: 1  Rows_examined: 1
SELECT * FROM orders WHERE id = 99;
";

    #[test]
    fn test_group_two_entries_one_shape() {
        let entries = parse_log_str(TWO_ORDERS);
        let groups = group_by_shape(&entries);
        assert_eq!(groups.len(), 1);

        let group = &groups["select * from orders where id = ?"];
        assert_eq!(group.count, 2);
        assert!(approx(group.total_time, 13.3));
        assert!(approx(group.avg_time, 6.65));
        assert_eq!(group.max_time, 12.5);
        assert_eq!(group.min_time, 0.8);
        assert_eq!(group.statement_type, StatementType::Select);
        assert_eq!(group.total_rows_examined, 500001);
        assert_eq!(group.max_rows_examined, 500000);
        assert!(approx(group.avg_rows_examined, 250000.5));
        assert_eq!(group.worst_example().map(|e| e.raw_query.as_str()), Some("SELECT * FROM orders WHERE id = 42"));
        assert_eq!(group.first_seen(), Some("240105 14:03:11"));
        assert_eq!(group.last_seen(), Some("240105 14:05:00"));
    }

    #[test]
    fn test_group_in_lists_merge() {
        let log = "# Time: 240105 14:03:11
DELETE FROM logs WHERE id IN (1,2,3,4);
# Time: 240105 14:03:12
DELETE FROM logs WHERE id IN (5,6);
";
        let groups = group_by_shape(&parse_log_str(log));
        assert_eq!(groups.len(), 1);
        let group = &groups["delete from logs where id in (?)"];
        assert_eq!(group.count, 2);
        assert_eq!(group.statement_type, StatementType::Delete);
    }

    #[test]
    fn test_group_totals_match_members() {
        let log = "# Time: 240105 14:03:11
# Query_time: 1.25  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 3
SELECT a FROM t WHERE b = 1;
# Time: 240105 14:03:12
UPDATE t SET a = 2;
# Time: 240105 14:03:13
# Query_time: 2.5  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 9
SELECT a FROM t WHERE b = 7;
";
        let groups = group_by_shape(&parse_log_str(log));
        for group in groups.values() {
            assert_eq!(group.count as usize, group.members.len());
            let sum: f64 = group.members.iter().map(LogEntry::query_secs).sum();
            assert!(approx(group.total_time, sum));
        }
        // Missing Query_time counts as zero.
        assert_eq!(groups["update t set a = ?"].min_time, 0.0);
    }

    #[test]
    fn test_group_empty_shape_uses_unknown_key() {
        let entry = LogEntry {
            timestamp: "240105 14:03:11".to_string(),
            query_time: Some(1.0),
            ..Default::default()
        };
        let groups = group_by_shape(&[entry]);
        let group = &groups[UNKNOWN_SHAPE];
        assert_eq!(group.count, 1);
        assert_eq!(group.statement_type, StatementType::Unknown);
    }

    #[test]
    fn test_group_set_timestamp_only_block_lands_in_unknown() {
        let log = "# Time: 240105 14:03:11
# Query_time: 7.0  Lock_time: 0.0 Rows_sent: 0  Rows_examined: 0
SET timestamp=1704463391;
# Time: 240105 14:03:12
# Query_time: 1.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT 1;
";
        let entries = parse_log_str(log);
        let groups = group_by_shape(&entries);
        assert_eq!(groups.len(), 2);

        let unknown = &groups[UNKNOWN_SHAPE];
        assert_eq!(unknown.count, 1);
        assert_eq!(unknown.total_time, 7.0);
        assert_eq!(unknown.statement_type, StatementType::Unknown);

        let summary = summarize(&entries);
        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.unique_queries, 2);
        assert!(approx(summary.total_time, 8.0));
    }

    #[test]
    fn test_summarize() {
        let entries = parse_log_str(TWO_ORDERS);
        let summary = summarize(&entries);
        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.unique_queries, 1);
        assert!(approx(summary.total_time, 13.3));
        assert!(approx(summary.avg_time.unwrap(), 6.65));
        assert_eq!(summary.max_time, Some(12.5));
        assert_eq!(summary.total_rows_examined, 500001);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_queries, 0);
        assert_eq!(summary.unique_queries, 0);
        assert_eq!(summary.total_time, 0.0);
        assert_eq!(summary.avg_time, None);
        assert_eq!(summary.max_time, None);
    }

    #[test]
    fn test_ranked_orders_and_breaks_ties() {
        let log = "# Time: 240105 14:03:11
# Query_time: 1.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT * FROM b;
# Time: 240105 14:03:12
# Query_time: 1.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT * FROM a;
# Time: 240105 14:03:13
# Query_time: 5.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT * FROM c;
# Time: 240105 14:03:14
# Query_time: 0.5  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT * FROM b;
";
        let groups = group_by_shape(&parse_log_str(log));

        let by_total: Vec<&str> = ranked(&groups, RankBy::Total, 10)
            .iter()
            .map(|g| g.normalized_query.as_str())
            .collect();
        assert_eq!(by_total, ["select * from c", "select * from b", "select * from a"]);

        let by_count: Vec<&str> = ranked(&groups, RankBy::Count, 2)
            .iter()
            .map(|g| g.normalized_query.as_str())
            .collect();
        assert_eq!(by_count, ["select * from b", "select * from a"]);
    }

    #[test]
    fn test_percentile_and_query_id() {
        let entries = parse_log_str(TWO_ORDERS);
        let groups = group_by_shape(&entries);
        let group = &groups["select * from orders where id = ?"];
        assert_eq!(group.percentile(0.95), 12.5);
        assert_eq!(group.percentile(0.5), 0.8);
        assert_eq!(group.query_id(), format!("{:x}", md5::compute("select * from orders where id = ?")));
        assert_eq!(group.query_id().len(), 32);
    }

    #[test]
    fn test_type_distribution() {
        let log = "# Time: 240105 14:03:11
SELECT 1;
# Time: 240105 14:03:12
SELECT 2;
# Time: 240105 14:03:13
CALL refresh();
";
        let groups = group_by_shape(&parse_log_str(log));
        let types = type_distribution(&groups);
        assert_eq!(types[&StatementType::Select], 2);
        assert_eq!(types[&StatementType::StoredProc], 1);
    }
}
