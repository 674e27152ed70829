use anyhow::Context;
use clap::Parser;
use slowlog_analyzer::aggregator::RankBy;
use slowlog_analyzer::parser::{parse_log, parse_log_file, LogEntry};
use slowlog_analyzer::report::{self, OutputFormat, ReportOptions};
use slowlog_analyzer::Analysis;
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Aggregate slow query log entries by query shape", long_about = None)]
struct Args {
    /// Path to the slow query log file(s); reads stdin when omitted
    #[arg(long = "files", num_args = 1..)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of query patterns to show in the report
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Ranking key for query patterns
    #[arg(long, value_enum, default_value_t = RankBy::Total)]
    sort: RankBy,

    /// Include the per-hour timeline
    #[arg(long)]
    timeline: bool,

    /// Log filter for diagnostics on stderr
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log filter {:?}", args.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let entries = read_entries(&args.files)?;
    let analysis = Analysis::from_entries(entries);
    info!(
        entries = analysis.summary.total_queries,
        patterns = analysis.summary.unique_queries,
        "log analyzed"
    );

    let options = ReportOptions {
        format: args.format,
        limit: args.limit,
        rank_by: args.sort,
        timeline: args.timeline,
    };
    report::print_report(&analysis, &options, args.output.as_ref())?;

    Ok(())
}

fn read_entries(files: &[PathBuf]) -> anyhow::Result<Vec<LogEntry>> {
    if files.is_empty() {
        info!("reading slow query log from stdin");
        return parse_log(io::stdin().lock())
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read slow query log from stdin");
    }

    let mut entries = Vec::new();
    for path in files {
        let parsed = parse_log_file(path)
            .with_context(|| format!("failed to parse slow query log {}", path.display()))?;
        info!(path = %path.display(), entries = parsed.len(), "read log file");
        entries.extend(parsed);
    }
    Ok(entries)
}
