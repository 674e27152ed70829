//! Optimizer-warning analysis for a query group.
//!
//! Tallies are per execution, except the examine-ratio warning which counts
//! once for the whole group.

use crate::parser::LogEntry;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Rows examined per row sent above which a group is flagged.
pub const HIGH_EXAMINE_RATIO: f64 = 1000.0;

/// Average rows examined above which a row-scan advisory is added.
pub const HEAVY_SCAN_ROWS: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// A condition observed in at least one execution of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Finding {
    TmpDiskTables,
    FullScan,
    FullJoin,
    Filesort,
    TmpTables,
    HighExamineRatio,
    HeavyRowScan,
}

impl Finding {
    pub fn severity(&self) -> Severity {
        match self {
            Finding::TmpDiskTables | Finding::FullScan | Finding::FullJoin => Severity::Critical,
            Finding::Filesort | Finding::HighExamineRatio => Severity::Warning,
            Finding::TmpTables | Finding::HeavyRowScan => Severity::Info,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Finding::TmpDiskTables => "Temp tables created on disk (memory exhausted)",
            Finding::FullScan => "Full table scans detected",
            Finding::FullJoin => "Full joins without indexes",
            Finding::Filesort => "Filesort operations (ORDER BY/GROUP BY without index)",
            Finding::TmpTables => "Temporary tables created",
            Finding::HighExamineRatio => "High examine-to-result ratio",
            Finding::HeavyRowScan => "Very large average number of rows examined",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            Finding::FullScan | Finding::FullJoin => "Add indexes on JOIN/WHERE columns",
            Finding::Filesort => "Create composite index for ORDER BY/GROUP BY",
            Finding::TmpDiskTables => "Increase tmp_table_size and max_heap_table_size",
            Finding::TmpTables => "Reduce intermediate result size or cover GROUP BY with an index",
            Finding::HighExamineRatio => "Review WHERE conditions",
            Finding::HeavyRowScan => "Consider query optimization",
        }
    }
}

/// Severity tallies plus the distinct findings behind them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueReport {
    pub critical: u32,
    pub warning: u32,
    pub info: u32,
    pub has_suggestions: bool,
    pub findings: BTreeSet<Finding>,
}

impl IssueReport {
    pub fn is_clean(&self) -> bool {
        !self.has_suggestions
    }
}

pub fn analyze_issues(members: &[LogEntry]) -> IssueReport {
    let mut report = IssueReport::default();

    for entry in members {
        if entry.tmp_disk_tables.unwrap_or(0) > 0 {
            report.critical += 1;
            report.findings.insert(Finding::TmpDiskTables);
        }
        if entry.full_scan {
            report.critical += 1;
            report.findings.insert(Finding::FullScan);
        }
        if entry.full_join {
            report.critical += 1;
            report.findings.insert(Finding::FullJoin);
        }
        if entry.filesort {
            report.warning += 1;
            report.findings.insert(Finding::Filesort);
        }
        if entry.tmp_tables.unwrap_or(0) > 0 {
            report.info += 1;
            report.findings.insert(Finding::TmpTables);
        }
    }

    if members.iter().any(|e| e.examine_ratio() > HIGH_EXAMINE_RATIO) {
        report.warning += 1;
        report.findings.insert(Finding::HighExamineRatio);
    }

    report.has_suggestions = report.critical + report.warning + report.info > 0;

    // Advisory only: does not feed the tallies.
    if !members.is_empty() {
        let avg_rows = members.iter().map(LogEntry::examined).sum::<u64>() as f64 / members.len() as f64;
        if avg_rows > HEAVY_SCAN_ROWS {
            report.findings.insert(Finding::HeavyRowScan);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LogEntry {
        LogEntry {
            timestamp: "240105 14:03:11".to_string(),
            query_time: Some(1.0),
            rows_sent: Some(10),
            rows_examined: Some(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_group() {
        let report = analyze_issues(&[entry(), entry()]);
        assert_eq!(report, IssueReport::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_per_member_tallies() {
        let disk = LogEntry {
            tmp_tables: Some(2),
            tmp_disk_tables: Some(1),
            full_scan: true,
            ..entry()
        };
        let sorted = LogEntry {
            filesort: true,
            full_join: true,
            ..entry()
        };
        let report = analyze_issues(&[disk.clone(), sorted, disk]);

        assert_eq!(report.critical, 5);
        assert_eq!(report.warning, 1);
        assert_eq!(report.info, 2);
        assert!(report.has_suggestions);
        assert_eq!(
            report.findings.iter().copied().collect::<Vec<_>>(),
            [Finding::TmpDiskTables, Finding::FullScan, Finding::FullJoin, Finding::Filesort, Finding::TmpTables]
        );
    }

    #[test]
    fn test_high_ratio_counts_once_per_group() {
        let scan = LogEntry {
            rows_sent: Some(0),
            rows_examined: Some(5000),
            ..entry()
        };
        let report = analyze_issues(&[scan.clone(), scan.clone(), scan]);
        assert_eq!(report.warning, 1);
        assert_eq!(report.critical, 0);
        assert!(report.has_suggestions);
        assert!(report.findings.contains(&Finding::HighExamineRatio));
    }

    #[test]
    fn test_ratio_boundary_is_exclusive() {
        let edge = LogEntry {
            rows_sent: Some(1),
            rows_examined: Some(1000),
            ..entry()
        };
        assert!(analyze_issues(&[edge]).is_clean());
    }

    #[test]
    fn test_heavy_scan_is_advisory() {
        let heavy = LogEntry {
            rows_sent: Some(10_000),
            rows_examined: Some(2_000_000),
            ..entry()
        };
        let report = analyze_issues(&[heavy]);
        assert!(report.findings.contains(&Finding::HeavyRowScan));
        assert!(!report.has_suggestions);
        assert_eq!(Finding::HeavyRowScan.severity(), Severity::Info);
    }

    #[test]
    fn test_empty_group() {
        assert!(analyze_issues(&[]).is_clean());
    }
}
