use crate::classifier::{classify, StatementType};
use crate::parser::LogEntry;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Executions slower than this many seconds count as slow in the timeline.
pub const SLOW_QUERY_SECS: f64 = 10.0;

static RE_LOG_TIMESTAMP: OnceLock<Regex> = OnceLock::new();

fn log_timestamp_re() -> &'static Regex {
    RE_LOG_TIMESTAMP.get_or_init(|| Regex::new(r"(\d{2})(\d{2})(\d{2})\s+(\d{1,2}):(\d{2}):(\d{2})").unwrap())
}

/// Executions that fall into one calendar hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucket {
    /// `YYMMDD HH:00`
    pub time: String,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub total_time: f64,
    pub avg_time: f64,
    pub max_time: f64,
    pub types: BTreeMap<StatementType, u64>,
}

impl TimeBucket {
    fn new(time: String) -> Self {
        Self {
            time,
            total_queries: 0,
            slow_queries: 0,
            total_time: 0.0,
            avg_time: 0.0,
            max_time: 0.0,
            types: BTreeMap::new(),
        }
    }
}

/// Hour bucket key for a raw timestamp.
///
/// Accepts the log-native `YYMMDD H:MM:SS` form and RFC 3339 (as written by
/// newer servers); both map onto the same `YYMMDD HH:00` key space.
pub fn hour_key(raw: &str) -> Option<String> {
    if let Some(caps) = log_timestamp_re().captures(raw) {
        return Some(format!("{}{}{} {:0>2}:00", &caps[1], &caps[2], &caps[3], &caps[4]));
    }
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format("%y%m%d %H:00").to_string())
}

/// Renders a timestamp as `YYYY-MM-DD HH:MM:SS`; unknown forms pass through.
pub fn display_timestamp(raw: &str) -> String {
    if let Some(caps) = log_timestamp_re().captures(raw) {
        let year = 2000 + caps[1].parse::<u32>().unwrap_or(0);
        return format!(
            "{}-{}-{} {:0>2}:{}:{}",
            year, &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]
        );
    }
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Buckets entries by hour, in chronological (key) order.
///
/// Entries without a recognizable timestamp or without a query time are
/// left out of the timeline only.
pub fn bucket_by_hour(entries: &[LogEntry]) -> Vec<TimeBucket> {
    let mut buckets: BTreeMap<String, TimeBucket> = BTreeMap::new();

    for entry in entries {
        let Some(time) = entry.query_time else {
            debug!(timestamp = %entry.timestamp, "no query time, skipped from timeline");
            continue;
        };
        let Some(key) = hour_key(&entry.timestamp) else {
            debug!(timestamp = %entry.timestamp, "unparsable timestamp, skipped from timeline");
            continue;
        };

        let bucket = buckets.entry(key.clone()).or_insert_with(|| TimeBucket::new(key));
        bucket.total_queries += 1;
        bucket.total_time += time;
        bucket.max_time = bucket.max_time.max(time);
        if time > SLOW_QUERY_SECS {
            bucket.slow_queries += 1;
        }

        let shape = if entry.normalized_query.is_empty() {
            &entry.raw_query
        } else {
            &entry.normalized_query
        };
        *bucket.types.entry(classify(shape)).or_insert(0) += 1;
    }

    buckets
        .into_values()
        .map(|mut bucket| {
            bucket.avg_time = bucket.total_time / bucket.total_queries as f64;
            bucket
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_log_str;

    #[test]
    fn test_hour_key() {
        assert_eq!(hour_key("240105 14:03:11"), Some("240105 14:00".to_string()));
        assert_eq!(hour_key("240105  9:03:11.123456"), Some("240105 09:00".to_string()));
        assert_eq!(hour_key("2024-01-05T14:03:11.123456Z"), Some("240105 14:00".to_string()));
        assert_eq!(hour_key("2024-01-05T14:03:11+02:00"), Some("240105 12:00".to_string()));
        assert_eq!(hour_key("yesterday"), None);
        assert_eq!(hour_key(""), None);
    }

    #[test]
    fn test_display_timestamp() {
        assert_eq!(display_timestamp("240105 9:03:11"), "2024-01-05 09:03:11");
        assert_eq!(display_timestamp("2024-01-05T14:03:11Z"), "2024-01-05 14:03:11");
        assert_eq!(display_timestamp("not a time"), "not a time");
    }

    #[test]
    fn test_bucket_by_hour() {
        let log = "# Time: 240105 15:10:00
# Query_time: 12.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT * FROM t WHERE id = 1;
# Time: 240105  9:59:59
# Query_time: 2.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
UPDATE t SET a = 1;
# Time: 240105 15:45:00
# Query_time: 4.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT * FROM t WHERE id = 2;
# Time: 240105 16:00:00
SELECT * FROM no_metrics;
# Time: garbage
# Query_time: 1.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1
SELECT 1;
";
        let entries = parse_log_str(log);
        assert_eq!(entries.len(), 5);

        let buckets = bucket_by_hour(&entries);
        let keys: Vec<&str> = buckets.iter().map(|b| b.time.as_str()).collect();
        assert_eq!(keys, ["240105 09:00", "240105 15:00"]);

        let afternoon = &buckets[1];
        assert_eq!(afternoon.total_queries, 2);
        assert_eq!(afternoon.slow_queries, 1);
        assert_eq!(afternoon.total_time, 16.0);
        assert_eq!(afternoon.avg_time, 8.0);
        assert_eq!(afternoon.max_time, 12.0);
        assert_eq!(afternoon.types[&StatementType::Select], 2);

        assert_eq!(buckets[0].types[&StatementType::Update], 1);
        assert_eq!(buckets[0].slow_queries, 0);
    }

    #[test]
    fn test_bucket_keys_are_non_decreasing() {
        let mut log = String::new();
        for (day, hour) in [(7, 23), (5, 1), (6, 0), (5, 13), (7, 2)] {
            log.push_str(&format!(
                "# Time: 2401{day:02} {hour}:00:00\n# Query_time: 1.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1\nSELECT 1;\n"
            ));
        }
        let buckets = bucket_by_hour(&parse_log_str(&log));
        assert_eq!(buckets.len(), 5);
        assert!(buckets.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_bucket_by_hour_empty() {
        assert!(bucket_by_hour(&[]).is_empty());
    }
}
