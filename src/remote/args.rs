//! `CREATE VIRTUAL TABLE ... USING <module>(...)` arguments.

use crate::error::{EngineError, EngineResult};
use crate::observability::Sensitive;
use crate::remote::column::TableRef;

const CONNECTION_KEYS: &[&str] = &[
    "connection_string",
    "connectionstring",
    "url",
    "uri",
    "dsn",
    "data_source_name",
    "connection",
    "conn",
];

const TABLE_KEYS: &[&str] = &["table", "name", "table_name", "tablename"];

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteArgs {
    pub connection_string: Sensitive<String>,
    pub table: TableRef,
}

impl RemoteArgs {
    /// Parses the module arguments, i.e. everything after the module, database
    /// and table names the host passes first.
    ///
    /// The first two arguments may be given positionally (connection string,
    /// then table); `key=value` pairs override them.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> EngineResult<Self> {
        let mut connection = None;
        let mut table = None;

        for (position, raw) in args.iter().enumerate() {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            if let Some((key, value)) = split_pair(raw) {
                let key = key.to_ascii_lowercase();
                if CONNECTION_KEYS.contains(&key.as_str()) {
                    connection = Some(value.to_string());
                    continue;
                }
                if TABLE_KEYS.contains(&key.as_str()) {
                    table = Some(value.to_string());
                    continue;
                }
            }
            match position {
                0 if connection.is_none() => connection = Some(unquote(raw).to_string()),
                1 if table.is_none() => table = Some(unquote(raw).to_string()),
                _ => tracing::debug!(argument = position, "ignoring unrecognized module argument"),
            }
        }

        let connection_string = connection
            .filter(|c| !c.is_empty())
            .ok_or_else(|| EngineError::configuration("missing connection string argument"))?;
        let table = table
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::configuration("missing table argument"))?;

        Ok(Self {
            connection_string: Sensitive::new(connection_string),
            table: TableRef::parse(&strip_identifier_quotes(&table))?,
        })
    }
}

fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '\'' || c == '"').trim()
}

/// `key = 'value'`, with optional quotes around either side. A connection
/// string containing `=` only counts as a pair when its key is a bare word.
fn split_pair(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.split_once('=')?;
    let key = unquote(key);
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, unquote(value)))
}

/// Drops quotes and backticks around each part of `schema.table`.
fn strip_identifier_quotes(raw: &str) -> String {
    raw.split('.')
        .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`'))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let args = RemoteArgs::parse(&["'postgres://u:p@h/db'", "\"public.users\""]).unwrap();
        assert_eq!(args.connection_string.expose(), "postgres://u:p@h/db");
        assert_eq!(args.table.schema.as_deref(), Some("public"));
        assert_eq!(args.table.name, "users");
    }

    #[test]
    fn test_named_arguments_and_aliases() {
        let args = RemoteArgs::parse(&["table = 'orders'", "DSN='mysql://h/db?x=1'"]).unwrap();
        assert_eq!(args.connection_string.expose(), "mysql://h/db?x=1");
        assert_eq!(args.table.name, "orders");
        assert_eq!(args.table.schema, None);

        let args = RemoteArgs::parse(&["connectionString=\"duckdb://:memory:\"", "tableName=t"]).unwrap();
        assert_eq!(args.connection_string.expose(), "duckdb://:memory:");
        assert_eq!(args.table.name, "t");
    }

    #[test]
    fn test_keyword_connection_string_is_positional() {
        // `host=... user=...` has spaces in its "key", so it is not a pair.
        let args = RemoteArgs::parse(&["'host=localhost user=me'", "`sales`.`q1`"]).unwrap();
        assert_eq!(args.connection_string.expose(), "host=localhost user=me");
        assert_eq!(args.table.to_string(), "sales.q1");
    }

    #[test]
    fn test_missing_arguments() {
        let err = RemoteArgs::parse::<&str>(&[]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert!(RemoteArgs::parse(&["url='x'"]).is_err());
        assert!(RemoteArgs::parse(&["", "t"]).is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let args = RemoteArgs::parse(&["postgres://u:hunter2@h/db", "t"]).unwrap();
        let shown = format!("{args:?}");
        assert!(!shown.contains("hunter2"), "{shown}");
        assert!(shown.contains("postgres://u:***@h/db"), "{shown}");
    }
}
