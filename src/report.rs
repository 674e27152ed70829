use crate::aggregator::{ranked, type_distribution, QueryGroup, RankBy, Summary};
use crate::classifier::StatementType;
use crate::issues::{analyze_issues, Finding, IssueReport, Severity};
use crate::parser::LogEntry;
use crate::timeline::{display_timestamp, TimeBucket};
use crate::Analysis;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tabled::{Table, Tabled};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Html,
    Json,
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub format: OutputFormat,
    pub limit: usize,
    pub rank_by: RankBy,
    pub timeline: bool,
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Count")]
    count: u64,
    #[tabled(rename = "Total Time")]
    total_time: String,
    #[tabled(rename = "Mean Time")]
    mean_time: String,
    #[tabled(rename = "Max Time")]
    max_time: String,
    #[tabled(rename = "Type")]
    statement_type: String,
    #[tabled(rename = "Issues")]
    issues: String,
    #[tabled(rename = "Query ID")]
    query_id: String,
    #[tabled(rename = "Query")]
    query: String,
}

#[derive(Tabled)]
struct TimelineRow {
    #[tabled(rename = "Hour")]
    hour: String,
    #[tabled(rename = "Queries")]
    total_queries: u64,
    #[tabled(rename = "Slow (>10s)")]
    slow_queries: u64,
    #[tabled(rename = "Total Time")]
    total_time: String,
    #[tabled(rename = "Mean Time")]
    avg_time: String,
    #[tabled(rename = "Max Time")]
    max_time: String,
}

#[derive(Debug, Serialize)]
struct ReportItem<'a> {
    rank: usize,
    query_id: String,
    #[serde(flatten)]
    group: &'a QueryGroup,
    p95: f64,
    p99: f64,
    avg_lock_time: f64,
    examine_ratio: f64,
    first_seen: Option<&'a str>,
    last_seen: Option<&'a str>,
    worst_example_query: &'a str,
    issues: IssueReport,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a Summary,
    statement_types: BTreeMap<StatementType, u64>,
    patterns: &'a [ReportItem<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    timeline: Option<Vec<TimeBucket>>,
    entries: &'a [LogEntry],
}

pub fn print_report(analysis: &Analysis, options: &ReportOptions, output_path: Option<&PathBuf>) -> anyhow::Result<()> {
    let mut writer: Box<dyn Write> = if let Some(path) = output_path {
        Box::new(std::fs::File::create(path)?)
    } else {
        Box::new(std::io::stdout())
    };
    write_report(analysis, options, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_report(analysis: &Analysis, options: &ReportOptions, writer: &mut dyn Write) -> anyhow::Result<()> {
    let items = prepare_report_items(&analysis.groups, options.rank_by, options.limit);
    let timeline = options.timeline.then(|| analysis.timeline());

    match options.format {
        OutputFormat::Table => {
            print_summary(&analysis.summary, &analysis.groups, writer)?;

            let rows: Vec<Row> = items
                .iter()
                .map(|item| Row {
                    rank: item.rank,
                    count: item.group.count,
                    total_time: format_duration(item.group.total_time),
                    mean_time: format_duration(item.group.avg_time),
                    max_time: format_duration(item.group.max_time),
                    statement_type: item.group.statement_type.to_string(),
                    issues: issue_badge(&item.issues),
                    query_id: item.query_id.clone(),
                    query: truncate_chars(&item.group.normalized_query, 50),
                })
                .collect();
            writeln!(writer, "{}", Table::new(rows))?;

            if let Some(buckets) = &timeline {
                print_timeline(buckets, writer)?;
            }
            print_detailed_sections(&items, writer)?;
        }
        OutputFormat::Html => {
            print_html(&analysis.summary, &items, timeline.as_deref(), writer)?;
        }
        OutputFormat::Json => {
            let report = JsonReport {
                summary: &analysis.summary,
                statement_types: type_distribution(&analysis.groups),
                patterns: &items,
                timeline,
                entries: &analysis.entries,
            };
            serde_json::to_writer_pretty(&mut *writer, &report)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn prepare_report_items(groups: &BTreeMap<String, QueryGroup>, rank_by: RankBy, limit: usize) -> Vec<ReportItem<'_>> {
    ranked(groups, rank_by, limit)
        .into_iter()
        .enumerate()
        .map(|(i, group)| ReportItem {
            rank: i + 1,
            query_id: group.query_id(),
            group,
            p95: group.percentile(0.95),
            p99: group.percentile(0.99),
            avg_lock_time: group.avg_lock_time(),
            examine_ratio: group.examine_ratio(),
            first_seen: group.first_seen(),
            last_seen: group.last_seen(),
            worst_example_query: group.worst_example().map(|e| e.raw_query.as_str()).unwrap_or_default(),
            issues: analyze_issues(&group.members),
        })
        .collect()
}

fn print_summary(summary: &Summary, groups: &BTreeMap<String, QueryGroup>, writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer, "Summary\n=======")?;
    writeln!(writer, "  Total Queries:   {}", summary.total_queries)?;
    writeln!(writer, "  Unique Patterns: {}", summary.unique_queries)?;
    writeln!(writer, "  Total Time:      {}", format_duration(summary.total_time))?;
    writeln!(writer, "  Mean Time:       {}", summary.avg_time.map(format_duration).unwrap_or_else(|| "n/a".to_string()))?;
    writeln!(writer, "  Max Time:        {}", summary.max_time.map(format_duration).unwrap_or_else(|| "n/a".to_string()))?;
    writeln!(writer, "  Rows Examined:   {}", format_count(summary.total_rows_examined as f64))?;

    let types = type_distribution(groups);
    if !types.is_empty() {
        let parts: Vec<String> = types.iter().map(|(t, n)| format!("{t}={n}")).collect();
        writeln!(writer, "  Statement Types: {}", parts.join(" "))?;
    }
    writeln!(writer)?;
    Ok(())
}

fn print_timeline(buckets: &[TimeBucket], writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer, "\nTimeline\n========")?;
    let rows: Vec<TimelineRow> = buckets
        .iter()
        .map(|b| TimelineRow {
            hour: b.time.clone(),
            total_queries: b.total_queries,
            slow_queries: b.slow_queries,
            total_time: format_duration(b.total_time),
            avg_time: format_duration(b.avg_time),
            max_time: format_duration(b.max_time),
        })
        .collect();
    writeln!(writer, "{}", Table::new(rows))?;
    Ok(())
}

fn print_detailed_sections(items: &[ReportItem<'_>], writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer, "\nDetailed Report\n===============")?;

    for item in items {
        let group = item.group;
        writeln!(writer, "\nQuery ID: {}", item.query_id)?;
        writeln!(writer, "Rank: {}", item.rank)?;
        writeln!(writer, "  Type: {}", group.statement_type)?;
        writeln!(writer, "  Time Range: {}", time_range(item))?;
        writeln!(writer, "  Execution Stats:")?;
        writeln!(writer, "    Count: {}", group.count)?;
        writeln!(writer, "    Total Time: {:.3}s", group.total_time)?;
        writeln!(writer, "    Mean Time:  {:.3}s", group.avg_time)?;
        writeln!(writer, "    Min Time:   {:.3}s", group.min_time)?;
        writeln!(writer, "    Max Time:   {:.3}s", group.max_time)?;
        writeln!(writer, "    P95:        {:.3}s", item.p95)?;
        writeln!(writer, "    P99:        {:.3}s", item.p99)?;
        writeln!(writer, "    Total Lock Time: {:.3}s", group.total_lock_time)?;
        writeln!(writer, "    Mean Lock Time:  {:.3}s", item.avg_lock_time)?;
        writeln!(writer, "  Row Stats:")?;
        writeln!(writer, "    Sent:       {}", group.total_rows_sent)?;
        writeln!(writer, "    Examined:   {}", group.total_rows_examined)?;
        writeln!(writer, "    Mean Examined: {}", format_count(group.avg_rows_examined))?;
        writeln!(writer, "    Max Examined:  {}", format_count(group.max_rows_examined as f64))?;
        writeln!(writer, "    Examined/Sent Ratio: {:.2}", item.examine_ratio)?;
        writeln!(writer, "  Issues:")?;
        if item.issues.is_clean() {
            writeln!(writer, "    No major performance issues detected")?;
        }
        for finding in &item.issues.findings {
            writeln!(writer, "    [{}] {}: {}", finding.severity(), finding.description(), finding_suggestion(*finding, group))?;
        }
        writeln!(writer, "  Normalized Query:")?;
        writeln!(writer, "    {}", group.normalized_query)?;
        writeln!(writer, "  Worst Case Example:")?;
        writeln!(writer, "    {}", item.worst_example_query)?;
        writeln!(writer, "--------------------------------------------------------------------------------")?;
    }
    Ok(())
}

fn print_html(summary: &Summary, items: &[ReportItem<'_>], timeline: Option<&[TimeBucket]>, writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer, "<!DOCTYPE html>")?;
    writeln!(writer, "<html>")?;
    writeln!(writer, "<head>")?;
    writeln!(writer, "<title>Slow Query Log Report</title>")?;
    writeln!(writer, "<style>")?;
    writeln!(writer, "body {{ font-family: sans-serif; margin: 20px; }}")?;
    writeln!(writer, "table {{ border-collapse: collapse; width: 100%; margin-bottom: 20px; }}")?;
    writeln!(writer, "th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}")?;
    writeln!(writer, "th {{ background-color: #f2f2f2; }}")?;
    writeln!(writer, ".query-block {{ border: 1px solid #ccc; padding: 15px; margin-bottom: 20px; border-radius: 5px; }}")?;
    writeln!(writer, ".query-sql {{ background-color: #f8f8f8; padding: 10px; overflow-x: auto; font-family: monospace; }}")?;
    writeln!(writer, ".critical {{ color: #b91c1c; }} .warning {{ color: #c2410c; }} .info {{ color: #1d4ed8; }}")?;
    writeln!(writer, "</style>")?;
    writeln!(writer, "</head>")?;
    writeln!(writer, "<body id=\"top\">")?;

    writeln!(writer, "<h1>Slow Query Log Report</h1>")?;

    writeln!(writer, "<h2>Summary</h2>")?;
    writeln!(writer, "<ul>")?;
    writeln!(writer, "<li>Total Queries: {}</li>", summary.total_queries)?;
    writeln!(writer, "<li>Unique Patterns: {}</li>", summary.unique_queries)?;
    writeln!(writer, "<li>Total Time: {}</li>", format_duration(summary.total_time))?;
    writeln!(writer, "<li>Mean Time: {}</li>", summary.avg_time.map(format_duration).unwrap_or_else(|| "n/a".to_string()))?;
    writeln!(writer, "<li>Max Time: {}</li>", summary.max_time.map(format_duration).unwrap_or_else(|| "n/a".to_string()))?;
    writeln!(writer, "<li>Rows Examined: {}</li>", format_count(summary.total_rows_examined as f64))?;
    writeln!(writer, "</ul>")?;

    writeln!(writer, "<h2>Patterns</h2>")?;
    writeln!(writer, "<table>")?;
    writeln!(writer, "<thead><tr><th>Rank</th><th>Count</th><th>Total Time</th><th>Mean Time</th><th>Type</th><th>Issues</th><th>Query</th></tr></thead>")?;
    writeln!(writer, "<tbody>")?;
    for item in items {
        writeln!(writer, "<tr>")?;
        writeln!(writer, "<td>{}</td>", item.rank)?;
        writeln!(writer, "<td>{}</td>", item.group.count)?;
        writeln!(writer, "<td>{}</td>", format_duration(item.group.total_time))?;
        writeln!(writer, "<td>{}</td>", format_duration(item.group.avg_time))?;
        writeln!(writer, "<td>{}</td>", item.group.statement_type)?;
        writeln!(writer, "<td>{}</td>", issue_badge(&item.issues))?;
        writeln!(writer, "<td><a href=\"#{}\">{}</a></td>", item.query_id, html_escape(&truncate_chars(&item.group.normalized_query, 100)))?;
        writeln!(writer, "</tr>")?;
    }
    writeln!(writer, "</tbody>")?;
    writeln!(writer, "</table>")?;

    if let Some(buckets) = timeline {
        writeln!(writer, "<h2>Timeline</h2>")?;
        writeln!(writer, "<table>")?;
        writeln!(writer, "<thead><tr><th>Hour</th><th>Queries</th><th>Slow (&gt;10s)</th><th>Total Time</th><th>Mean Time</th><th>Max Time</th></tr></thead>")?;
        writeln!(writer, "<tbody>")?;
        for b in buckets {
            writeln!(
                writer,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                b.time,
                b.total_queries,
                b.slow_queries,
                format_duration(b.total_time),
                format_duration(b.avg_time),
                format_duration(b.max_time)
            )?;
        }
        writeln!(writer, "</tbody>")?;
        writeln!(writer, "</table>")?;
    }

    writeln!(writer, "<h2>Detailed Report</h2>")?;
    for item in items {
        let group = item.group;
        writeln!(writer, "<div id=\"{}\" class=\"query-block\">", item.query_id)?;
        writeln!(writer, "<h3>Rank {}: Query ID {}</h3>", item.rank, item.query_id)?;
        writeln!(writer, "<p><strong>Time Range:</strong> {}</p>", html_escape(&time_range(item)))?;

        writeln!(writer, "<h4>Execution Stats</h4>")?;
        writeln!(writer, "<ul>")?;
        writeln!(writer, "<li>Count: {}</li>", group.count)?;
        writeln!(writer, "<li>Total Time: {:.3}s</li>", group.total_time)?;
        writeln!(writer, "<li>Mean Time: {:.3}s</li>", group.avg_time)?;
        writeln!(writer, "<li>Min / Max Time: {:.3}s / {:.3}s</li>", group.min_time, group.max_time)?;
        writeln!(writer, "<li>P95: {:.3}s</li>", item.p95)?;
        writeln!(writer, "<li>P99: {:.3}s</li>", item.p99)?;
        writeln!(writer, "<li>Mean Lock Time: {:.3}s</li>", item.avg_lock_time)?;
        writeln!(writer, "<li>Mean Rows Examined: {}</li>", format_count(group.avg_rows_examined))?;
        writeln!(writer, "<li>Examined/Sent Ratio: {:.2}</li>", item.examine_ratio)?;
        writeln!(writer, "</ul>")?;

        writeln!(writer, "<h4>Issues</h4>")?;
        writeln!(writer, "<ul>")?;
        if item.issues.is_clean() {
            writeln!(writer, "<li>No major performance issues detected</li>")?;
        }
        for finding in &item.issues.findings {
            writeln!(
                writer,
                "<li class=\"{}\">{}: {}</li>",
                finding.severity(),
                finding.description(),
                html_escape(&finding_suggestion(*finding, group))
            )?;
        }
        writeln!(writer, "</ul>")?;

        writeln!(writer, "<h4>Normalized Query</h4>")?;
        writeln!(writer, "<div class=\"query-sql\"><pre>{}</pre></div>", html_escape(&group.normalized_query))?;
        writeln!(writer, "<h4>Worst Case Example</h4>")?;
        writeln!(writer, "<div class=\"query-sql\"><pre>{}</pre></div>", html_escape(item.worst_example_query))?;

        writeln!(writer, "<p><a href=\"#top\">Back to Top</a></p>")?;
        writeln!(writer, "</div>")?;
    }

    writeln!(writer, "</body>")?;
    writeln!(writer, "</html>")?;
    Ok(())
}

fn time_range(item: &ReportItem<'_>) -> String {
    match (item.first_seen, item.last_seen) {
        (Some(first), Some(last)) => format!("{} - {}", display_timestamp(first), display_timestamp(last)),
        _ => "N/A".to_string(),
    }
}

fn finding_suggestion(finding: Finding, group: &QueryGroup) -> String {
    match finding {
        Finding::HeavyRowScan => format!(
            "{} (examining {} rows avg)",
            finding.suggestion(),
            format_count(group.avg_rows_examined)
        ),
        _ => finding.suggestion().to_string(),
    }
}

/// Compact severity badge; info is only shown when nothing worse is present.
pub fn issue_badge(report: &IssueReport) -> String {
    if !report.has_suggestions {
        return "-".to_string();
    }
    let mut parts = Vec::new();
    if report.critical > 0 {
        parts.push(format!("{} {}", Severity::Critical, report.critical));
    }
    if report.warning > 0 {
        parts.push(format!("{} {}", Severity::Warning, report.warning));
    }
    if parts.is_empty() && report.info > 0 {
        parts.push(format!("{} {}", Severity::Info, report.info));
    }
    parts.join(", ")
}

/// Human-readable duration: seconds below a minute, then minutes, then hours.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.2}s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1}m", seconds / 60.0)
    } else {
        format!("{:.1}h", seconds / 3600.0)
    }
}

/// Magnitude-abbreviated count (`1.5K`, `2.0M`).
pub fn format_count(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.1}M", n / 1_000_000.0)
    } else if n >= 1000.0 {
        format!("{:.1}K", n / 1000.0)
    } else if n.fract() == 0.0 {
        format!("{}", n as u64)
    } else {
        format!("{:.1}", n)
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn truncate_chars(query: &str, max: usize) -> String {
    if query.chars().count() <= max {
        return query.to_string();
    }
    let mut q: String = query.chars().take(max.saturating_sub(3)).collect();
    q.push_str("...");
    q
}
