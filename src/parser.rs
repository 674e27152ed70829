use crate::classifier::{classify, StatementType};
use crate::error::{DigestError, Result};
use crate::fingerprint::fingerprint;
use regex::Regex;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// One recorded query execution.
///
/// Metadata that was missing or malformed in the log stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogEntry {
    /// Log-native `YYMMDD HH:MM:SS[.ffffff]` text, as written after `# Time:`.
    pub timestamp: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub ip: Option<String>,
    pub thread_id: Option<u64>,
    pub schema: Option<String>,
    pub query_time: Option<f64>,
    pub lock_time: Option<f64>,
    pub rows_sent: Option<u64>,
    pub rows_examined: Option<u64>,
    pub rows_affected: Option<u64>,
    pub bytes_sent: Option<u64>,
    pub tmp_tables: Option<u64>,
    pub tmp_disk_tables: Option<u64>,
    pub full_scan: bool,
    pub full_join: bool,
    pub tmp_table: bool,
    pub filesort: bool,
    pub raw_query: String,
    pub normalized_query: String,
    pub statement_type: StatementType,
}

impl LogEntry {
    /// Query time in seconds, zero when absent.
    pub fn query_secs(&self) -> f64 {
        self.query_time.unwrap_or(0.0)
    }

    pub fn lock_secs(&self) -> f64 {
        self.lock_time.unwrap_or(0.0)
    }

    pub fn examined(&self) -> u64 {
        self.rows_examined.unwrap_or(0)
    }

    pub fn sent(&self) -> u64 {
        self.rows_sent.unwrap_or(0)
    }

    /// Rows examined per row sent; a result of zero rows counts as one.
    pub fn examine_ratio(&self) -> f64 {
        self.examined() as f64 / self.sent().max(1) as f64
    }
}

static RE_USER_HOST: OnceLock<Regex> = OnceLock::new();
static RE_THREAD: OnceLock<Regex> = OnceLock::new();
static RE_METRICS: OnceLock<Regex> = OnceLock::new();
static RE_ROWS_AFFECTED: OnceLock<Regex> = OnceLock::new();
static RE_TMP_TABLES: OnceLock<Regex> = OnceLock::new();
static RE_SET_TIMESTAMP: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Statement,
    Explain,
}

/// Line-driven state of the slow log scanner.
///
/// `feed` consumes one line and returns an entry whenever a `# Time:`
/// boundary completes the previous one; `finish` flushes the last entry.
#[derive(Debug, Default)]
pub struct ParserState {
    current: LogEntry,
    query_lines: Vec<String>,
    mode: Mode,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, raw_line: &str) -> Option<LogEntry> {
        let line = raw_line.trim();

        if let Some(value) = line.strip_prefix("# Time:") {
            let finished = self.finish();
            self.current.timestamp = value.trim().to_string();
            return finished;
        }

        if line.starts_with("# User@Host:") {
            self.parse_user_host(line);
        } else if line.starts_with("# Thread_id:") {
            self.parse_thread(line);
        } else if line.starts_with("# Query_time:") {
            self.parse_metrics(line);
        } else if line.starts_with("# Rows_affected:") {
            self.parse_rows_affected(line);
        } else if line.starts_with("# Tmp_tables:") {
            self.parse_tmp_tables(line);
        } else if line.starts_with("# Full_scan:") {
            self.current.full_scan = line.contains("Full_scan: Yes");
            self.current.full_join = line.contains("Full_join: Yes");
            self.current.tmp_table = line.contains("Tmp_table: Yes");
            self.current.filesort = line.contains("Filesort: Yes");
        } else if line.starts_with("# explain:") {
            self.mode = Mode::Explain;
        } else if line == "#" && self.mode == Mode::Explain {
            self.mode = Mode::Statement;
        } else if !line.is_empty() && !line.starts_with('#') {
            // A statement line always ends a plan block.
            self.mode = Mode::Statement;
            self.query_lines.push(line.to_string());
        }

        None
    }

    /// Completes the in-progress entry and resets the state.
    pub fn finish(&mut self) -> Option<LogEntry> {
        let lines = std::mem::take(&mut self.query_lines);
        let mut entry = std::mem::take(&mut self.current);
        self.mode = Mode::Statement;

        if entry.timestamp.is_empty() {
            if !lines.is_empty() {
                debug!(lines = lines.len(), "discarding statement text without a # Time: header");
            }
            return None;
        }
        if lines.is_empty() {
            debug!(timestamp = %entry.timestamp, "discarding header-only entry");
            return None;
        }

        // May be empty when the block only held `SET timestamp=N;`; the entry
        // is still kept and groups under the unknown shape.
        let statement = extract_statement(&lines.join(" "));

        entry.normalized_query = fingerprint(&statement);
        entry.statement_type = classify(&entry.normalized_query);
        entry.raw_query = statement;
        Some(entry)
    }

    fn parse_user_host(&mut self, line: &str) {
        let re = RE_USER_HOST.get_or_init(|| {
            Regex::new(r"# User@Host: ([^@]+)@([^@]+) @ ([^\[]+) \[([^\]]+)\]").unwrap()
        });
        match re.captures(line) {
            Some(caps) => {
                self.current.user = Some(caps[1].trim().to_string());
                self.current.host = Some(caps[3].trim().to_string());
                self.current.ip = Some(caps[4].trim().to_string());
            }
            None => trace!(line, "unrecognized User@Host line"),
        }
    }

    fn parse_thread(&mut self, line: &str) {
        let re = RE_THREAD.get_or_init(|| Regex::new(r"Thread_id: (\d+)\s+Schema: (\w+)").unwrap());
        match re.captures(line) {
            Some(caps) => {
                self.current.thread_id = caps[1].parse().ok();
                self.current.schema = Some(caps[2].to_string());
            }
            None => trace!(line, "unrecognized Thread_id line"),
        }
    }

    fn parse_metrics(&mut self, line: &str) {
        let re = RE_METRICS.get_or_init(|| {
            Regex::new(r"Query_time: ([\d.]+)\s+Lock_time: ([\d.]+)\s+Rows_sent: (\d+)\s+Rows_examined: (\d+)").unwrap()
        });
        match re.captures(line) {
            Some(caps) => {
                self.current.query_time = caps[1].parse().ok();
                self.current.lock_time = caps[2].parse().ok();
                self.current.rows_sent = caps[3].parse().ok();
                self.current.rows_examined = caps[4].parse().ok();
            }
            None => trace!(line, "unrecognized Query_time line"),
        }
    }

    fn parse_rows_affected(&mut self, line: &str) {
        let re = RE_ROWS_AFFECTED.get_or_init(|| Regex::new(r"Rows_affected: (\d+)\s+Bytes_sent: (\d+)").unwrap());
        match re.captures(line) {
            Some(caps) => {
                self.current.rows_affected = caps[1].parse().ok();
                self.current.bytes_sent = caps[2].parse().ok();
            }
            None => trace!(line, "unrecognized Rows_affected line"),
        }
    }

    fn parse_tmp_tables(&mut self, line: &str) {
        let re = RE_TMP_TABLES.get_or_init(|| Regex::new(r"Tmp_tables: (\d+)\s+Tmp_disk_tables: (\d+)").unwrap());
        match re.captures(line) {
            Some(caps) => {
                self.current.tmp_tables = caps[1].parse().ok();
                self.current.tmp_disk_tables = caps[2].parse().ok();
            }
            None => trace!(line, "unrecognized Tmp_tables line"),
        }
    }
}

/// Drops the session `SET timestamp=N;` prefix and keeps the first statement.
fn extract_statement(joined: &str) -> String {
    let re = RE_SET_TIMESTAMP.get_or_init(|| Regex::new(r"(?i)^SET timestamp=\d+;\s*").unwrap());
    let without_set = re.replace(joined, "");
    without_set
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Parses a slow query log stream, yielding entries as their blocks complete.
pub struct LogParser<R> {
    reader: R,
    state: ParserState,
    read_buffer: Vec<u8>,
    done: bool,
}

impl<R: BufRead> LogParser<R> {
    /// Creates a new `LogParser` for the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: ParserState::new(),
            read_buffer: Vec::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.read_buffer.clear();
            match self.reader.read_until(b'\n', &mut self.read_buffer) {
                Ok(0) => {
                    // EOF
                    self.done = true;
                    return self.state.finish().map(Ok);
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(DigestError::Io(e)));
                }
            }

            // Stray bytes in statements must not abort the scan.
            let line = String::from_utf8_lossy(&self.read_buffer);
            if let Some(entry) = self.state.feed(&line) {
                return Some(Ok(entry));
            }
        }
    }
}

/// Convenience function to create a `LogParser`.
pub fn parse_log<R: BufRead>(reader: R) -> LogParser<R> {
    LogParser::new(reader)
}

/// Parses a complete log held in memory.
pub fn parse_log_str(text: &str) -> Vec<LogEntry> {
    let mut state = ParserState::new();
    let mut entries: Vec<LogEntry> = text.split('\n').filter_map(|line| state.feed(line)).collect();
    entries.extend(state.finish());
    entries
}

/// Reads and parses a whole log file.
pub fn parse_log_file(path: &Path) -> Result<Vec<LogEntry>> {
    let file = File::open(path).map_err(|source| DigestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_log(BufReader::new(file))
        .map(|entry| {
            entry.map_err(|e| match e {
                DigestError::Io(source) => DigestError::Read {
                    path: path.to_path_buf(),
                    source,
                },
                other => other,
            })
        })
        .collect()
}
