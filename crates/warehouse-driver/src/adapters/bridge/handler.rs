use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    core::{
        classify,
        compiler::QueryCompiler,
        materialize::materialize_rows,
        retry::{self, RetryPolicy},
        types::{ColumnDefinition, QueryMode, TableQuery},
        warehouse::{SchemaReflection, WarehouseClient},
    },
    error::{AppError, AppResult},
};

use super::protocol::*;

pub struct BridgeHandler<W> {
    warehouse: Arc<W>,
    retry: RetryPolicy,
}

impl<W> BridgeHandler<W>
where
    W: WarehouseClient + SchemaReflection + 'static,
{
    pub fn new(warehouse: Arc<W>, retry: RetryPolicy) -> Self {
        Self { warehouse, retry }
    }

    pub async fn handle(&self, req: BridgeRequest) -> BridgeResponse<serde_json::Value> {
        if req.v != PROTOCOL_VERSION {
            return BridgeResponse::err(
                req.v,
                req.id,
                "INVALID_REQUEST",
                format!("unsupported protocol version: {}", req.v),
            );
        }

        let BridgeRequest { v, id, cmd, payload } = req;
        let result = match cmd.as_str() {
            "columns" => self.handle_columns(payload).await,
            "compile" => self.handle_compile(payload).await,
            "preview" => self.handle_rows(payload, QueryMode::Preview).await,
            "export" => self.handle_rows(payload, QueryMode::Select).await,
            "classify" => handle_classify(payload),
            other => Err(AppError::invalid_request(format!("unknown cmd: {other}"))),
        };

        match result {
            Ok(data) => BridgeResponse::ok(v, id, data),
            Err(e) => {
                tracing::warn!(cmd = %cmd, code = e.code(), error = %e, "command failed");
                BridgeResponse::from_error(v, id, &e)
            }
        }
    }

    async fn handle_columns(&self, payload: serde_json::Value) -> AppResult<serde_json::Value> {
        let p: ColumnsPayload = parse_payload(payload)?;
        let columns = self.fetch_schema(&p.dataset, &p.table).await?;
        Ok(serde_json::to_value(columns)?)
    }

    async fn handle_compile(&self, payload: serde_json::Value) -> AppResult<serde_json::Value> {
        let p: CompilePayload = parse_payload(payload)?;
        let schema = self.fetch_schema(&p.query.dataset, &p.query.table).await?;
        let dialect = p.dialect.unwrap_or_else(|| self.warehouse.dialect());
        let compiled = QueryCompiler::new(dialect).compile(p.mode, &p.query, &schema)?;
        Ok(serde_json::to_value(compiled)?)
    }

    async fn handle_rows(
        &self,
        payload: serde_json::Value,
        mode: QueryMode,
    ) -> AppResult<serde_json::Value> {
        let query: TableQuery = parse_payload(payload)?;
        let schema = self.fetch_schema(&query.dataset, &query.table).await?;
        let compiled = Arc::new(
            QueryCompiler::new(self.warehouse.dialect()).compile(mode, &query, &schema)?,
        );

        let warehouse = self.warehouse.clone();
        let to_run = compiled.clone();
        let result = retry::run(
            &self.retry,
            "run_query",
            move || warehouse.run_query(&to_run),
            || self.warehouse.interrupt(),
        )
        .await?;

        let rows = materialize_rows(mode, &result.rows, compiled.columns())?;
        tracing::info!(
            dataset = %query.dataset,
            table = %query.table,
            ?mode,
            rows = rows.len(),
            "rows fetched"
        );
        Ok(serde_json::to_value(TableRows {
            columns: compiled.columns().to_vec(),
            rows,
        })?)
    }

    async fn fetch_schema(&self, dataset: &str, table: &str) -> AppResult<Vec<ColumnDefinition>> {
        let warehouse = self.warehouse.clone();
        let (dataset, table) = (dataset.to_string(), table.to_string());
        retry::run(
            &self.retry,
            "columns",
            move || warehouse.columns(&dataset, &table),
            || self.warehouse.interrupt(),
        )
        .await
    }
}

fn handle_classify(payload: serde_json::Value) -> AppResult<serde_json::Value> {
    let p: ClassifyPayload = parse_payload(payload)?;
    let classification = classify::classify(p.status_code, &p.message);
    Ok(serde_json::to_value(classification)?)
}

fn parse_payload<T: DeserializeOwned>(payload: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(payload).map_err(|e| AppError::invalid_request(e.to_string()))
}
