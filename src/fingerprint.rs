use regex::Regex;
use std::sync::OnceLock;

static RE_WHITESPACE: OnceLock<Regex> = OnceLock::new();
static RE_SINGLE_QUOTED: OnceLock<Regex> = OnceLock::new();
static RE_DOUBLE_QUOTED: OnceLock<Regex> = OnceLock::new();
static RE_NUMBER: OnceLock<Regex> = OnceLock::new();
static RE_IN_LIST: OnceLock<Regex> = OnceLock::new();
static RE_TIMESTAMP: OnceLock<Regex> = OnceLock::new();
static RE_LIMIT: OnceLock<Regex> = OnceLock::new();
static RE_OFFSET: OnceLock<Regex> = OnceLock::new();

/// Reduces a SQL statement to its query shape.
///
/// Normalization, in order:
/// - Collapsing whitespace and trimming
/// - Replacing single- and double-quoted literals with `?`
/// - Replacing numbers with `?`
/// - Collapsing placeholder lists such as `(?, ?, ?)` into `(?)`
/// - Collapsing timestamp remnants (`?-?-? ?:?:?`) into `?`
/// - Rewriting `LIMIT n` and `LIMIT m, n` to `LIMIT ?`
/// - Rewriting `OFFSET n` to `OFFSET ?`
/// - Converting to lowercase
///
/// Later steps match on the placeholders produced by earlier ones, so the
/// order is fixed. Literal-looking text inside identifiers can still merge
/// distinct statements; that is accepted.
pub fn fingerprint(sql: &str) -> String {
    if sql.is_empty() {
        return String::new();
    }

    let re_whitespace = RE_WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap());
    let re_single = RE_SINGLE_QUOTED.get_or_init(|| Regex::new(r"'[^']*'").unwrap());
    let re_double = RE_DOUBLE_QUOTED.get_or_init(|| Regex::new(r#""[^"]*""#).unwrap());
    let re_number = RE_NUMBER.get_or_init(|| Regex::new(r"\b\d+\.?\d*\b").unwrap());
    let re_in_list = RE_IN_LIST.get_or_init(|| Regex::new(r"\(\s*\?\s*(?:,\s*\?\s*)+\)").unwrap());
    let re_timestamp = RE_TIMESTAMP.get_or_init(|| Regex::new(r"\?-\?-\?\s+\?:\?:\?(?:\.\?)?").unwrap());
    let re_limit = RE_LIMIT.get_or_init(|| Regex::new(r"(?i)\bLIMIT\s+\?(?:\s*,\s*\?)?").unwrap());
    let re_offset = RE_OFFSET.get_or_init(|| Regex::new(r"(?i)\bOFFSET\s+\?").unwrap());

    // 1. Collapse whitespace
    let collapsed = re_whitespace.replace_all(sql, " ");
    let collapsed = collapsed.trim();

    // 2-3. Replace strings with ?
    let no_strings = re_single.replace_all(collapsed, "?");
    let no_strings = re_double.replace_all(&no_strings, "?");

    // 4. Replace numbers with ?
    let no_numbers = re_number.replace_all(&no_strings, "?");

    // 5. IN (?, ?, ...) -> IN (?)
    let no_lists = re_in_list.replace_all(&no_numbers, "(?)");

    // 6. Unquoted datetime literals
    let no_timestamps = re_timestamp.replace_all(&no_lists, "?");

    // 7. Paging
    let paged = re_limit.replace_all(&no_timestamps, "LIMIT ?");
    let paged = re_offset.replace_all(&paged, "OFFSET ?");

    paged.to_lowercase()
}
