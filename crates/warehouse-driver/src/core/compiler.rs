//! Compiles a [`TableQuery`] into parameterized SQL against a known schema.
//!
//! All validation happens before any SQL is assembled. Filter values never
//! reach the SQL text: each one becomes a positional `?` placeholder with a
//! matching entry in the bindings and types lists.

use std::fmt::Write as _;

use serde_json::Value;

use super::{
    dialect::Dialect,
    limits::effective_limit,
    types::{
        normalize_column_name, BoundValue, ColumnDefinition, ColumnProjection, CompiledQuery,
        FilterCondition, FilterOperator, NumericInput, ParamType, QueryMode, TableQuery,
        WarehouseType,
    },
};
use crate::error::{AppError, AppResult};

/// Per-row modification time maintained by the warehouse loader.
pub const CHANGE_TRACKING_COLUMN: &str = "_timestamp";

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler {
    dialect: Dialect,
}

/// Placeholder values, kept in the order their `?` is written.
#[derive(Default)]
struct Params {
    bindings: Vec<BoundValue>,
    types: Vec<ParamType>,
}

impl Params {
    fn bind(&mut self, value: BoundValue, ty: ParamType) -> &'static str {
        self.bindings.push(value);
        self.types.push(ty);
        "?"
    }
}

/// A filter whose column resolved and whose values coerced to the column type.
struct TypedFilter<'a> {
    column: &'a ColumnDefinition,
    operator: FilterOperator,
    values: Vec<(BoundValue, ParamType)>,
}

impl QueryCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn compile(
        &self,
        mode: QueryMode,
        query: &TableQuery,
        schema: &[ColumnDefinition],
    ) -> AppResult<CompiledQuery> {
        if query.dataset.trim().is_empty() || query.table.trim().is_empty() {
            return Err(AppError::validation("dataset and table names are required"));
        }

        check_projection(mode, &query.columns)?;
        let limit = effective_limit(query.filters.limit.as_ref())?;
        let change_since =
            parse_unix_seconds("change_since", query.filters.change_since.as_ref())?;
        let change_until =
            parse_unix_seconds("change_until", query.filters.change_until.as_ref())?;

        for condition in &query.filters.conditions {
            find_column(schema, &condition.column)?;
        }
        let order_columns = query
            .order_by
            .iter()
            .map(|o| find_column(schema, &o.column))
            .collect::<AppResult<Vec<_>>>()?;
        let selected = if query.columns.is_empty() {
            schema.iter().collect::<Vec<_>>()
        } else {
            query
                .columns
                .iter()
                .map(|name| find_column(schema, name))
                .collect::<AppResult<Vec<_>>>()?
        };
        if selected.is_empty() {
            return Err(AppError::validation(format!(
                "table {}.{} has no columns to select",
                query.dataset, query.table
            )));
        }

        let filters = query
            .filters
            .conditions
            .iter()
            .map(|c| type_filter(schema, c))
            .collect::<AppResult<Vec<_>>>()?;
        if let Some(column) = order_columns.iter().find(|c| !c.column_type.is_sortable()) {
            return Err(AppError::validation(format!(
                "column `{}` of type {} cannot be used in ORDER BY",
                column.name, column.column_type
            )));
        }

        let d = self.dialect;
        let mut params = Params::default();
        let mut predicates = Vec::new();

        for filter in filters {
            let column = d.quote_ident(&filter.column.name);
            let placeholders = filter
                .values
                .into_iter()
                .map(|(value, ty)| params.bind(value, ty))
                .collect::<Vec<_>>()
                .join(", ");
            predicates.push(match filter.operator {
                FilterOperator::In => format!("{column} IN ({placeholders})"),
                op => format!("{column} {} {placeholders}", op.as_sql()),
            });
        }

        let search = query
            .filters
            .fulltext_search
            .as_deref()
            .filter(|term| !term.trim().is_empty());
        if let Some(term) = search {
            let matches = schema
                .iter()
                .filter(|c| c.column_type.is_string())
                .map(|c| {
                    params.bind(BoundValue::String(term.to_string()), ParamType::String);
                    d.contains(&d.quote_ident(&c.name))
                })
                .collect::<Vec<_>>();
            predicates.push(if matches.is_empty() {
                "FALSE".to_string()
            } else {
                format!("({})", matches.join(" OR "))
            });
        }

        let change_column = d.quote_ident(CHANGE_TRACKING_COLUMN);
        for (bound, op) in [(change_since, ">="), (change_until, "<")] {
            if let Some(seconds) = bound {
                params.bind(BoundValue::Int64(seconds), ParamType::Int64);
                predicates.push(format!("{change_column} {op} {}", d.unix_seconds_param()));
            }
        }

        let columns = selected.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        let select_list = columns
            .iter()
            .map(|name| d.quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {select_list} FROM {}",
            d.table_ref(&query.dataset, &query.table)
        );
        if !predicates.is_empty() {
            let _ = write!(sql, " WHERE {}", predicates.join(" AND "));
        }
        if !query.order_by.is_empty() {
            let order = order_columns
                .iter()
                .zip(&query.order_by)
                .map(|(column, o)| format!("{} {}", d.quote_ident(&column.name), o.direction.as_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(sql, " ORDER BY {order}");
        }
        let _ = write!(sql, " LIMIT {limit}");

        tracing::debug!(
            dialect = ?d,
            ?mode,
            sql = %sql,
            bindings = params.bindings.len(),
            "compiled query"
        );

        Ok(CompiledQuery::new(
            sql,
            params.bindings,
            params.types,
            columns,
            limit,
        ))
    }
}

fn check_projection(mode: QueryMode, projection: &ColumnProjection) -> AppResult<()> {
    if let Some(duplicate) = projection.first_duplicate() {
        return Err(AppError::validation(format!(
            "column `{}` is requested more than once",
            duplicate.trim()
        )));
    }
    if mode == QueryMode::Preview && projection.is_empty() {
        return Err(AppError::validation(
            "preview requires at least one column",
        ));
    }
    Ok(())
}

fn parse_unix_seconds(field: &str, raw: Option<&NumericInput>) -> AppResult<Option<i64>> {
    let Some(raw) = raw else { return Ok(None) };
    let text = raw.to_string();
    let trimmed = text.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(Some(seconds));
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.abs() < i64::MAX as f64 => Ok(Some(v.trunc() as i64)),
        _ => Err(AppError::validation(format!(
            "{field} must be a numeric unix timestamp, got `{raw}`"
        ))),
    }
}

/// Exact match first, then the warehouse's case-insensitive rule.
fn find_column<'a>(schema: &'a [ColumnDefinition], name: &str) -> AppResult<&'a ColumnDefinition> {
    schema
        .iter()
        .find(|c| c.name == name)
        .or_else(|| {
            let wanted = normalize_column_name(name);
            schema
                .iter()
                .find(|c| normalize_column_name(&c.name) == wanted)
        })
        .ok_or_else(|| AppError::validation(format!("column `{name}` does not exist")))
}

fn operator_accepts(operator: FilterOperator, ty: WarehouseType) -> bool {
    if operator.is_ordering() {
        ty.supports_ordering()
    } else {
        ty.supports_equality()
    }
}

fn type_filter<'a>(
    schema: &'a [ColumnDefinition],
    condition: &FilterCondition,
) -> AppResult<TypedFilter<'a>> {
    let column = find_column(schema, &condition.column)?;
    let operator = condition.operator;

    match (operator, condition.values.len()) {
        (FilterOperator::In, 0) => {
            return Err(AppError::validation(format!(
                "filter on `{}`: IN needs at least one value",
                column.name
            )))
        }
        (FilterOperator::In, _) | (_, 1) => {}
        (op, n) => {
            return Err(AppError::validation(format!(
                "filter on `{}`: operator {} takes exactly one value, got {n}",
                column.name,
                op.as_sql()
            )))
        }
    }

    let ty = column.column_type;
    if !operator_accepts(operator, ty) {
        let expected = WarehouseType::ALL
            .iter()
            .filter(|t| operator_accepts(operator, **t))
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        return Err(AppError::UnsupportedFilterType {
            column: column.name.clone(),
            operator: operator.as_sql().to_string(),
            expected,
            actual: ty.as_str().to_string(),
        });
    }

    let values = condition
        .values
        .iter()
        .map(|v| coerce_value(column, operator, v))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(TypedFilter {
        column,
        operator,
        values,
    })
}

fn literal_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOL",
        Value::Number(n) if n.is_i64() || n.is_u64() => "INT64",
        Value::Number(_) => "FLOAT64",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "STRUCT",
    }
}

fn is_decimal(s: &str) -> bool {
    s.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

/// Converts a filter literal into a value of the column's parameter type.
fn coerce_value(
    column: &ColumnDefinition,
    operator: FilterOperator,
    value: &Value,
) -> AppResult<(BoundValue, ParamType)> {
    if value.is_null() {
        return Err(AppError::validation(format!(
            "filter on `{}`: null values are not supported",
            column.name
        )));
    }

    let ty = column.column_type;
    let mismatch = || AppError::UnsupportedFilterType {
        column: column.name.clone(),
        operator: operator.as_sql().to_string(),
        expected: ty.as_str().to_string(),
        actual: literal_type(value).to_string(),
    };

    let text_param = match ty {
        WarehouseType::Date => Some(ParamType::Date),
        WarehouseType::Datetime => Some(ParamType::Datetime),
        WarehouseType::Time => Some(ParamType::Time),
        WarehouseType::Timestamp => Some(ParamType::Timestamp),
        WarehouseType::Interval => Some(ParamType::Interval),
        _ => None,
    };

    let bound = match (ty, value) {
        (WarehouseType::String, Value::String(s)) => {
            (BoundValue::String(s.clone()), ParamType::String)
        }
        (WarehouseType::Bytes, Value::String(s)) => (BoundValue::String(s.clone()), ParamType::Bytes),
        (WarehouseType::Int64, Value::Number(n)) => {
            let v = n.as_i64().ok_or_else(mismatch)?;
            (BoundValue::Int64(v), ParamType::Int64)
        }
        (WarehouseType::Int64, Value::String(s)) => {
            let v = s.trim().parse::<i64>().map_err(|_| mismatch())?;
            (BoundValue::Int64(v), ParamType::Int64)
        }
        (WarehouseType::Float64, Value::Number(n)) => {
            let v = n.as_f64().ok_or_else(mismatch)?;
            (BoundValue::Float64(v), ParamType::Float64)
        }
        (WarehouseType::Float64, Value::String(s)) => {
            let v = s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(mismatch)?;
            (BoundValue::Float64(v), ParamType::Float64)
        }
        (WarehouseType::Numeric | WarehouseType::BigNumeric, v) => {
            let text = match v {
                Value::Number(n) => n.to_string(),
                Value::String(s) if is_decimal(s) => s.trim().to_string(),
                _ => return Err(mismatch()),
            };
            let param = if ty == WarehouseType::Numeric {
                ParamType::Numeric
            } else {
                ParamType::BigNumeric
            };
            (BoundValue::String(text), param)
        }
        (WarehouseType::Bool, Value::Bool(b)) => (BoundValue::Bool(*b), ParamType::Bool),
        (WarehouseType::Bool, Value::String(s)) => {
            let v = match s.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(mismatch()),
            };
            (BoundValue::Bool(v), ParamType::Bool)
        }
        (_, Value::String(s)) if !s.trim().is_empty() => match text_param {
            Some(param) => (BoundValue::String(s.clone()), param),
            None => return Err(mismatch()),
        },
        _ => return Err(mismatch()),
    };
    Ok(bound)
}
