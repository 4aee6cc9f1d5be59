//! Rows of the `sqlite_schema` catalog table.

use super::record::Value;
use crate::sqlite::btree::BtreeKind;
use crate::sqlite::error::RecordError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Name under which the catalog table itself is reported
pub const SCHEMA_TABLE_NAME: &str = "sqlite_schema";

/// Root page of the catalog table
pub const SCHEMA_ROOT_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Index,
    View,
    Trigger,
}

impl ObjectKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(ObjectKind::Table),
            "index" => Some(ObjectKind::Index),
            "view" => Some(ObjectKind::View),
            "trigger" => Some(ObjectKind::Trigger),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::View => "view",
            ObjectKind::Trigger => "trigger",
        };
        write!(f, "{}", s)
    }
}

/// One row of the schema table: type, name, tbl_name, rootpage, sql
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind: ObjectKind,
    pub name: String,
    pub table_name: String,
    /// `None` for views, triggers and a zero rootpage
    pub root_page: Option<u32>,
    pub sql: Option<String>,
}

impl CatalogEntry {
    /// Builds an entry from the decoded columns of a schema row
    pub fn from_record(values: &[Value]) -> Result<Self, RecordError> {
        if values.len() < 5 {
            return Err(RecordError::UnexpectedValue {
                column: "sql",
                reason: format!("schema row has {} columns, expected 5", values.len()),
            });
        }

        let type_str = text_column(&values[0], "type")?;
        let kind = ObjectKind::parse(type_str).ok_or_else(|| RecordError::UnexpectedValue {
            column: "type",
            reason: format!("unknown object type '{}'", type_str),
        })?;
        let name = text_column(&values[1], "name")?.to_string();
        let table_name = text_column(&values[2], "tbl_name")?.to_string();

        let root_page = match &values[3] {
            Value::Null | Value::Integer(0) => None,
            Value::Integer(n) => Some(u32::try_from(*n).map_err(|_| {
                RecordError::UnexpectedValue {
                    column: "rootpage",
                    reason: format!("{} is not a page number", n),
                }
            })?),
            other => {
                return Err(RecordError::UnexpectedValue {
                    column: "rootpage",
                    reason: format!("expected integer, found {:?}", other),
                })
            }
        };

        let sql = match &values[4] {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => {
                return Err(RecordError::UnexpectedValue {
                    column: "sql",
                    reason: format!("expected text, found {:?}", other),
                })
            }
        };

        let entry = CatalogEntry {
            kind,
            name,
            table_name,
            root_page,
            sql,
        };
        debug!("Catalog entry: {} {} (root {:?})", entry.kind, entry.name, entry.root_page);
        Ok(entry)
    }

    /// True for tables declared `WITHOUT ROWID`, which are stored as index b-trees
    pub fn is_without_rowid(&self) -> bool {
        self.kind == ObjectKind::Table
            && self
                .sql
                .as_deref()
                .map_or(false, |sql| without_rowid_pattern().is_match(sql))
    }

    /// The b-tree layout of this object, or `None` if it owns no pages
    pub fn btree_kind(&self) -> Option<BtreeKind> {
        self.root_page?;
        match self.kind {
            ObjectKind::Table if self.is_without_rowid() => Some(BtreeKind::Index),
            ObjectKind::Table => Some(BtreeKind::Table),
            ObjectKind::Index => Some(BtreeKind::Index),
            ObjectKind::View | ObjectKind::Trigger => None,
        }
    }
}

fn text_column<'v>(value: &'v Value, column: &'static str) -> Result<&'v str, RecordError> {
    value.as_text().ok_or_else(|| RecordError::UnexpectedValue {
        column,
        reason: format!("expected text, found {:?}", value),
    })
}

fn without_rowid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\)\s*(?:STRICT\s*,\s*)?WITHOUT\s+ROWID(?:\s*,\s*STRICT)?\s*;?\s*$")
            .expect("WITHOUT ROWID pattern is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, name: &str, tbl: &str, root: Value, sql: Option<&str>) -> Vec<Value> {
        vec![
            Value::Text(kind.to_string()),
            Value::Text(name.to_string()),
            Value::Text(tbl.to_string()),
            root,
            sql.map_or(Value::Null, |s| Value::Text(s.to_string())),
        ]
    }

    #[test]
    fn decodes_table_row() {
        let values = row(
            "table",
            "apples",
            "apples",
            Value::Integer(2),
            Some("CREATE TABLE apples(id integer primary key, name text)"),
        );
        let entry = CatalogEntry::from_record(&values).unwrap();
        assert_eq!(entry.kind, ObjectKind::Table);
        assert_eq!(entry.name, "apples");
        assert_eq!(entry.root_page, Some(2));
        assert_eq!(entry.btree_kind(), Some(BtreeKind::Table));
    }

    #[test]
    fn views_and_triggers_own_no_pages() {
        let view = CatalogEntry::from_record(&row(
            "view",
            "v",
            "v",
            Value::Integer(0),
            Some("CREATE VIEW v AS SELECT 1"),
        ))
        .unwrap();
        assert_eq!(view.root_page, None);
        assert_eq!(view.btree_kind(), None);

        let trigger = CatalogEntry::from_record(&row("trigger", "t", "apples", Value::Null, None))
            .unwrap();
        assert_eq!(trigger.btree_kind(), None);
    }

    #[test]
    fn autoindex_without_sql_is_an_index() {
        let entry = CatalogEntry::from_record(&row(
            "index",
            "sqlite_autoindex_apples_1",
            "apples",
            Value::Integer(4),
            None,
        ))
        .unwrap();
        assert_eq!(entry.sql, None);
        assert_eq!(entry.btree_kind(), Some(BtreeKind::Index));
    }

    #[test]
    fn without_rowid_tables_use_index_btrees() {
        let entry = CatalogEntry::from_record(&row(
            "table",
            "kv",
            "kv",
            Value::Integer(3),
            Some("CREATE TABLE kv(k TEXT PRIMARY KEY, v) without   rowid"),
        ))
        .unwrap();
        assert!(entry.is_without_rowid());
        assert_eq!(entry.btree_kind(), Some(BtreeKind::Index));

        let strict = CatalogEntry {
            sql: Some("CREATE TABLE kv(k TEXT PRIMARY KEY) STRICT, WITHOUT ROWID".to_string()),
            ..entry.clone()
        };
        assert!(strict.is_without_rowid());

        let plain = CatalogEntry {
            sql: Some("CREATE TABLE t(without_rowid int)".to_string()),
            ..entry
        };
        assert!(!plain.is_without_rowid());
    }

    #[test]
    fn rejects_malformed_rows() {
        let unknown = row("widget", "w", "w", Value::Integer(2), None);
        assert!(matches!(
            CatalogEntry::from_record(&unknown),
            Err(RecordError::UnexpectedValue { column: "type", .. })
        ));

        let negative = row("table", "t", "t", Value::Integer(-1), None);
        assert!(matches!(
            CatalogEntry::from_record(&negative),
            Err(RecordError::UnexpectedValue {
                column: "rootpage",
                ..
            })
        ));

        assert!(CatalogEntry::from_record(&[Value::Null]).is_err());
    }
}
