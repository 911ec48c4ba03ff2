use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::{
    dialect::Dialect,
    types::{ColumnDefinition, CompiledQuery, RawRow},
};

/// Failure reported by a warehouse call: an HTTP-style status code and the
/// raw message body, which may be a JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("warehouse call failed ({status_code}): {message}")]
pub struct WarehouseError {
    pub status_code: u16,
    pub message: String,
}

impl WarehouseError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    /// A call that did not finish in time counts as a 503.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            503,
            format!("warehouse call timed out after {}ms", after.as_millis()),
        )
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(404, format!("Not found: {what}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    /// Column names in the order the warehouse returned them.
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Runs compiled queries. Calls block until the warehouse answers.
pub trait WarehouseClient: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn run_query(&self, query: &CompiledQuery) -> Result<QueryRows, WarehouseError>;

    /// Asks any call still running on this warehouse to stop. Called from
    /// another thread once a caller has given up waiting.
    fn interrupt(&self) {}
}

pub trait SchemaReflection: Send + Sync {
    /// Column definitions of `dataset.table` in declaration order.
    fn columns(&self, dataset: &str, table: &str) -> Result<Vec<ColumnDefinition>, WarehouseError>;
}
