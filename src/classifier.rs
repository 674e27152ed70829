use serde::Serialize;
use std::fmt;

/// Coarse statement kind derived from the leading keyword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    StoredProc,
    Create,
    Alter,
    Drop,
    Other,
    #[default]
    Unknown,
}

const LEADING_KEYWORDS: [(&str, StatementType); 8] = [
    ("select", StatementType::Select),
    ("insert", StatementType::Insert),
    ("update", StatementType::Update),
    ("delete", StatementType::Delete),
    ("call", StatementType::StoredProc),
    ("create", StatementType::Create),
    ("alter", StatementType::Alter),
    ("drop", StatementType::Drop),
];

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Select => "SELECT",
            StatementType::Insert => "INSERT",
            StatementType::Update => "UPDATE",
            StatementType::Delete => "DELETE",
            StatementType::StoredProc => "STORED_PROC",
            StatementType::Create => "CREATE",
            StatementType::Alter => "ALTER",
            StatementType::Drop => "DROP",
            StatementType::Other => "OTHER",
            StatementType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a (normalized) query by its leading keyword.
pub fn classify(query: &str) -> StatementType {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return StatementType::Unknown;
    }

    LEADING_KEYWORDS
        .iter()
        .find(|(keyword, _)| q.starts_with(keyword))
        .map(|(_, kind)| *kind)
        .unwrap_or(StatementType::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_keywords() {
        assert_eq!(classify("select * from t"), StatementType::Select);
        assert_eq!(classify("INSERT INTO t VALUES (?)"), StatementType::Insert);
        assert_eq!(classify("  update t set a = ?"), StatementType::Update);
        assert_eq!(classify("delete from t"), StatementType::Delete);
        assert_eq!(classify("call refresh(?)"), StatementType::StoredProc);
        assert_eq!(classify("create table t (a int)"), StatementType::Create);
        assert_eq!(classify("alter table t add b int"), StatementType::Alter);
        assert_eq!(classify("drop table t"), StatementType::Drop);
    }

    #[test]
    fn test_classify_other_and_unknown() {
        assert_eq!(classify("show processlist"), StatementType::Other);
        assert_eq!(classify(""), StatementType::Unknown);
        assert_eq!(classify("   "), StatementType::Unknown);
    }

    #[test]
    fn test_statement_type_display() {
        assert_eq!(StatementType::StoredProc.to_string(), "STORED_PROC");
        assert_eq!(
            serde_json::to_string(&StatementType::StoredProc).unwrap(),
            "\"STORED_PROC\""
        );
    }
}
