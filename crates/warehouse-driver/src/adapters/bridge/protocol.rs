use serde::{Deserialize, Serialize};

use crate::{
    core::{
        dialect::Dialect,
        types::{MaterializedRow, QueryMode, TableQuery},
    },
    error::AppError,
};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeRequest {
    pub v: u32,
    pub id: String,
    pub cmd: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct BridgeResponse<T> {
    pub v: u32,
    pub id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl<T> BridgeResponse<T> {
    pub fn ok(v: u32, id: String, data: T) -> Self {
        Self {
            v,
            id,
            status: "ok",
            data: Some(data),
            error: None,
            code: None,
            details: None,
        }
    }

    pub fn err(v: u32, id: String, code: &'static str, error: String) -> Self {
        Self {
            v,
            id,
            status: "error",
            data: None,
            error: Some(error),
            code: Some(code),
            details: None,
        }
    }

    pub fn from_error(v: u32, id: String, e: &AppError) -> Self {
        Self {
            details: e.details(),
            ..Self::err(v, id, e.code(), e.to_string())
        }
    }
}

// Payloads

#[derive(Debug, Deserialize)]
pub struct ColumnsPayload {
    pub dataset: String,
    pub table: String,
}

#[derive(Debug, Deserialize)]
pub struct CompilePayload {
    #[serde(flatten)]
    pub query: TableQuery,
    #[serde(default)]
    pub mode: QueryMode,
    /// Defaults to the dialect of the configured warehouse.
    #[serde(default)]
    pub dialect: Option<Dialect>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyPayload {
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

// Response data

#[derive(Debug, Serialize)]
pub struct TableRows {
    pub columns: Vec<String>,
    pub rows: Vec<MaterializedRow>,
}
