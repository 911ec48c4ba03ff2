//! A warehouse backed by SQLite files: each `<dataset>.sqlite` in the
//! warehouse directory is attached under its dataset name.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rusqlite::{
    params_from_iter,
    types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef},
    Connection, ErrorCode, InterruptHandle, Row,
};

use super::{
    dialect::Dialect,
    types::{BoundValue, ColumnDefinition, CompiledQuery, WarehouseType},
    warehouse::{QueryRows, SchemaReflection, WarehouseClient, WarehouseError},
};
use crate::error::{AppError, AppResult};

const BUSY_TIMEOUT_MS: u64 = 2_000;
const DATASET_EXTENSION: &str = "sqlite";

pub struct LocalWarehouse {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
    datasets: Vec<String>,
    root: PathBuf,
}

impl LocalWarehouse {
    pub fn open(dir: &Path) -> AppResult<Self> {
        let root = absolute_path(dir)?;
        let conn = Connection::open_in_memory().map_err(|source| AppError::WarehouseOpenFailed {
            path: root.clone(),
            source,
        })?;
        let _ = conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

        let mut files = std::fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == DATASET_EXTENSION))
            .collect::<Vec<_>>();
        files.sort();

        let mut datasets = Vec::with_capacity(files.len());
        for path in files {
            let (Some(name), Some(location)) =
                (path.file_stem().and_then(|s| s.to_str()), path.to_str())
            else {
                tracing::warn!(path = %path.display(), "skipping dataset file with non-UTF-8 path");
                continue;
            };
            // Dataset names follow the warehouse's rules: letters, digits, underscores.
            if !is_safe_identifier(name) {
                tracing::warn!(path = %path.display(), "skipping dataset file with invalid name");
                continue;
            }
            let sql = format!("ATTACH DATABASE ?1 AS {}", Dialect::Sqlite.quote_ident(name));
            match conn.execute(&sql, [location]) {
                Ok(_) => {
                    tracing::info!(dataset = name, path = %path.display(), "attached dataset");
                    datasets.push(name.to_string());
                }
                Err(e) => {
                    tracing::warn!(error = %e, dataset = name, "failed to attach dataset");
                }
            }
        }

        let interrupt = conn.get_interrupt_handle();
        Ok(Self {
            conn: Mutex::new(conn),
            interrupt,
            datasets,
            root,
        })
    }

    pub fn datasets(&self) -> &[String] {
        &self.datasets
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| WarehouseError::new(500, "warehouse connection lock poisoned"))?;
        f(&guard)
    }
}

impl SchemaReflection for LocalWarehouse {
    fn columns(&self, dataset: &str, table: &str) -> Result<Vec<ColumnDefinition>, WarehouseError> {
        if !self.datasets.iter().any(|d| d == dataset) {
            return Err(WarehouseError::not_found(format!("Dataset {dataset}")));
        }

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1, ?2) ORDER BY cid")
                .map_err(sqlite_error)?;
            let cols = stmt
                .query_map([table, dataset], |row: &Row<'_>| {
                    let name: String = row.get(0)?;
                    let decl_type: Option<String> = row.get(1)?;
                    let not_null: i64 = row.get(2)?;
                    Ok(ColumnDefinition::new(
                        name,
                        column_type(decl_type.as_deref().unwrap_or_default()),
                        not_null == 0,
                    ))
                })
                .map_err(sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sqlite_error)?;

            if cols.is_empty() {
                return Err(WarehouseError::not_found(format!("Table {dataset}.{table}")));
            }
            Ok(cols)
        })
    }
}

impl WarehouseClient for LocalWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn run_query(&self, query: &CompiledQuery) -> Result<QueryRows, WarehouseError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(query.sql()).map_err(sqlite_error)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

            let mut rows = Vec::new();
            let mut r = stmt
                .query(params_from_iter(query.bindings()))
                .map_err(sqlite_error)?;
            while let Some(row) = r.next().map_err(sqlite_error)? {
                rows.push(row_to_json_object(row, &columns).map_err(sqlite_error)?);
            }

            tracing::debug!(rows = rows.len(), "local query finished");
            Ok(QueryRows { columns, rows })
        })
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}

impl ToSql for BoundValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            BoundValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            BoundValue::Int64(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            BoundValue::Float64(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            BoundValue::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
        })
    }
}

/// Warehouse type names win; anything else follows SQLite's affinity rules.
fn column_type(decl_type: &str) -> WarehouseType {
    if let Some(ty) = WarehouseType::parse(decl_type) {
        return ty;
    }
    let upper = decl_type.to_ascii_uppercase();
    if upper.contains("INT") {
        WarehouseType::Int64
    } else if ["CHAR", "CLOB", "TEXT"].iter().any(|s| upper.contains(s)) {
        WarehouseType::String
    } else if upper.is_empty() || upper.contains("BLOB") {
        WarehouseType::Bytes
    } else if ["REAL", "FLOA", "DOUB"].iter().any(|s| upper.contains(s)) {
        WarehouseType::Float64
    } else {
        WarehouseType::Numeric
    }
}

fn sqlite_error(e: rusqlite::Error) -> WarehouseError {
    let message = e.to_string();
    let status = match e.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted,
        ) => 503,
        Some(ErrorCode::PermissionDenied | ErrorCode::AuthorizationForStatementDenied) => 403,
        _ if message.contains("no such table") || message.contains("no such column") => 404,
        _ => 400,
    };
    WarehouseError::new(status, message)
}

fn row_to_json_object(
    row: &Row<'_>,
    col_names: &[String],
) -> rusqlite::Result<HashMap<String, serde_json::Value>> {
    let mut out = HashMap::with_capacity(col_names.len());
    for (i, name) in col_names.iter().enumerate() {
        let v = match row.get_ref(i)? {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Integer(x) => serde_json::Value::from(x),
            ValueRef::Real(x) => serde_json::Value::from(x),
            ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => serde_json::Value::from(BASE64.encode(b)),
        };
        out.insert(name.clone(), v);
    }
    Ok(out)
}

pub(crate) fn is_safe_identifier(s: &str) -> bool {
    // [A-Za-z_][A-Za-z0-9_]*
    let mut chars = s.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn absolute_path(path: &Path) -> AppResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::LocalWarehouse;

    /// A view that takes seconds to evaluate.
    pub const SLOW_VIEW: &str = "CREATE VIEW slow AS
         WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 200000000)
         SELECT count(*) AS n FROM c;";

    pub const LONG_NOTE: &str =
        "this note is deliberately longer than fifty characters to test truncation";

    /// A warehouse directory with one dataset, `sales`, holding `orders`.
    pub fn warehouse() -> (TempDir, LocalWarehouse) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("sales.sqlite")).unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE orders (
                 id INTEGER NOT NULL,
                 customer TEXT,
                 note VARCHAR(200),
                 amount REAL,
                 paid BOOLEAN,
                 attachment BLOB,
                 _timestamp INTEGER
             );
             INSERT INTO orders VALUES (1, 'alice', 'first order', 10.5, 1, x'00ff', 1700000000);
             INSERT INTO orders VALUES (2, 'bob', '{LONG_NOTE}', 20.0, 0, NULL, 1700000100);
             INSERT INTO orders VALUES (3, 'carol', NULL, NULL, 1, NULL, 1700000200);"
        ))
        .unwrap();
        drop(conn);
        std::fs::write(dir.path().join("not a dataset.sqlite"), b"").unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        (dir, warehouse)
    }
}
