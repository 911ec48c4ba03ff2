use serde::{Deserialize, Serialize};

/// SQL flavour the compiled query is rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    BigQuery,
    Sqlite,
}

impl Dialect {
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Dialect::BigQuery => {
                format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
            }
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn table_ref(self, dataset: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(dataset), self.quote_ident(table))
    }

    /// Case-insensitive substring match of one placeholder against an
    /// already quoted column.
    pub fn contains(self, column: &str) -> String {
        match self {
            Dialect::BigQuery => format!("CONTAINS_SUBSTR({column}, ?)"),
            Dialect::Sqlite => format!("instr(lower({column}), lower(?)) > 0"),
        }
    }

    /// Placeholder for a unix-seconds value compared against a timestamp column.
    pub fn unix_seconds_param(self) -> &'static str {
        match self {
            Dialect::BigQuery => "TIMESTAMP_SECONDS(?)",
            Dialect::Sqlite => "?",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigquery_escapes_backticks_and_backslashes() {
        assert_eq!(Dialect::BigQuery.quote_ident("plain"), "`plain`");
        assert_eq!(Dialect::BigQuery.quote_ident("a`b"), "`a\\`b`");
        assert_eq!(Dialect::BigQuery.quote_ident("a\\b"), "`a\\\\b`");
    }

    #[test]
    fn sqlite_doubles_quotes() {
        assert_eq!(Dialect::Sqlite.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Sqlite.table_ref("ds", "t"), "\"ds\".\"t\"");
    }
}
