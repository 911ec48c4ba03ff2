use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

/// Scalar types a warehouse column can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarehouseType {
    String,
    Bytes,
    Int64,
    Float64,
    Numeric,
    BigNumeric,
    Bool,
    Date,
    Datetime,
    Time,
    Timestamp,
    Interval,
    Geography,
    Json,
    Array,
    Struct,
}

impl WarehouseType {
    pub const ALL: [WarehouseType; 16] = [
        WarehouseType::String,
        WarehouseType::Bytes,
        WarehouseType::Int64,
        WarehouseType::Float64,
        WarehouseType::Numeric,
        WarehouseType::BigNumeric,
        WarehouseType::Bool,
        WarehouseType::Date,
        WarehouseType::Datetime,
        WarehouseType::Time,
        WarehouseType::Timestamp,
        WarehouseType::Interval,
        WarehouseType::Geography,
        WarehouseType::Json,
        WarehouseType::Array,
        WarehouseType::Struct,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WarehouseType::String => "STRING",
            WarehouseType::Bytes => "BYTES",
            WarehouseType::Int64 => "INT64",
            WarehouseType::Float64 => "FLOAT64",
            WarehouseType::Numeric => "NUMERIC",
            WarehouseType::BigNumeric => "BIGNUMERIC",
            WarehouseType::Bool => "BOOL",
            WarehouseType::Date => "DATE",
            WarehouseType::Datetime => "DATETIME",
            WarehouseType::Time => "TIME",
            WarehouseType::Timestamp => "TIMESTAMP",
            WarehouseType::Interval => "INTERVAL",
            WarehouseType::Geography => "GEOGRAPHY",
            WarehouseType::Json => "JSON",
            WarehouseType::Array => "ARRAY",
            WarehouseType::Struct => "STRUCT",
        }
    }

    /// Parses a declared type name, including legacy aliases and parameterized
    /// forms such as `STRING(10)`, `NUMERIC(10, 2)` or `ARRAY<INT64>`.
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.starts_with("ARRAY<") {
            return Some(WarehouseType::Array);
        }
        if upper.starts_with("STRUCT<") {
            return Some(WarehouseType::Struct);
        }
        let base = upper.split('(').next().unwrap_or_default().trim();
        let ty = match base {
            "STRING" => WarehouseType::String,
            "BYTES" => WarehouseType::Bytes,
            "INT64" | "INT" | "INTEGER" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" => {
                WarehouseType::Int64
            }
            "FLOAT64" | "FLOAT" => WarehouseType::Float64,
            "NUMERIC" | "DECIMAL" => WarehouseType::Numeric,
            "BIGNUMERIC" | "BIGDECIMAL" => WarehouseType::BigNumeric,
            "BOOL" | "BOOLEAN" => WarehouseType::Bool,
            "DATE" => WarehouseType::Date,
            "DATETIME" => WarehouseType::Datetime,
            "TIME" => WarehouseType::Time,
            "TIMESTAMP" => WarehouseType::Timestamp,
            "INTERVAL" => WarehouseType::Interval,
            "GEOGRAPHY" => WarehouseType::Geography,
            "JSON" => WarehouseType::Json,
            "ARRAY" => WarehouseType::Array,
            "STRUCT" | "RECORD" => WarehouseType::Struct,
            _ => return None,
        };
        Some(ty)
    }

    /// Types accepted by `=`, `<>` and `IN`.
    pub fn supports_equality(self) -> bool {
        !matches!(
            self,
            WarehouseType::Geography
                | WarehouseType::Json
                | WarehouseType::Array
                | WarehouseType::Struct
        )
    }

    /// Types accepted by `<`, `<=`, `>` and `>=` in a filter.
    pub fn supports_ordering(self) -> bool {
        self.supports_equality() && self != WarehouseType::Bool
    }

    /// Types that can appear in ORDER BY.
    pub fn is_sortable(self) -> bool {
        self.supports_equality()
    }

    pub fn is_string(self) -> bool {
        self == WarehouseType::String
    }
}

impl fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: WarehouseType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: WarehouseType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOperator {
    pub fn as_sql(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Neq => "<>",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::In => "IN",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub fulltext_search: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub change_since: Option<NumericInput>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub change_until: Option<NumericInput>,
    /// Absent or 0 means "use the default".
    #[serde(default)]
    pub limit: Option<NumericInput>,
}

/// A number the host may send either as a JSON number or as a string.
/// Range and format checks happen in the compiler, not during parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for NumericInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericInput::Number(n) => write!(f, "{n}"),
            NumericInput::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for NumericInput {
    fn from(v: i64) -> Self {
        NumericInput::Number(v.into())
    }
}

impl From<&str> for NumericInput {
    fn from(v: &str) -> Self {
        NumericInput::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

pub type OrderSpec = Vec<OrderBy>;

/// Ordered list of requested columns. Empty means "all columns" in export mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnProjection(pub Vec<String>);

impl ColumnProjection {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// First column that repeats an earlier one after normalization
    /// (trimmed, ASCII case-insensitive).
    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::with_capacity(self.0.len());
        self.iter()
            .find(|name| !seen.insert(normalize_column_name(name)))
    }
}

pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Full export: native values, projection optional.
    #[default]
    #[serde(alias = "export")]
    Select,
    /// Bounded preview: stringified, truncated values.
    Preview,
}

/// Everything a caller says about which rows and columns it wants from one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableQuery {
    pub dataset: String,
    pub table: String,
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub order_by: OrderSpec,
    #[serde(default)]
    pub columns: ColumnProjection,
}

/// Warehouse query parameter types, parallel to the bound values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamType {
    String,
    Bytes,
    Int64,
    Float64,
    Numeric,
    BigNumeric,
    Bool,
    Date,
    Datetime,
    Time,
    Timestamp,
    Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundValue {
    String(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

/// SQL text plus the values for its positional placeholders.
///
/// Only the compiler builds one; `bindings` and `types` always line up with the
/// `?` placeholders in `sql`, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    sql: String,
    bindings: Vec<BoundValue>,
    types: Vec<ParamType>,
    columns: Vec<String>,
    limit: u32,
}

impl CompiledQuery {
    pub(crate) fn new(
        sql: String,
        bindings: Vec<BoundValue>,
        types: Vec<ParamType>,
        columns: Vec<String>,
        limit: u32,
    ) -> Self {
        Self {
            sql,
            bindings,
            types,
            columns,
            limit,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[BoundValue] {
        &self.bindings
    }

    pub fn types(&self) -> &[ParamType] {
        &self.types
    }

    /// Selected columns in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// One row as returned by the warehouse, keyed by column name.
pub type RawRow = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Text(String),
    Native(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializedCell {
    pub column_name: String,
    pub value: CellValue,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MaterializedRow {
    pub cells: Vec<MaterializedCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorClassification {
    pub retryable: bool,
    pub decoded_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases_and_parameterized_types() {
        assert_eq!(WarehouseType::parse("integer"), Some(WarehouseType::Int64));
        assert_eq!(WarehouseType::parse("STRING(255)"), Some(WarehouseType::String));
        assert_eq!(WarehouseType::parse("NUMERIC(10, 2)"), Some(WarehouseType::Numeric));
        assert_eq!(WarehouseType::parse("ARRAY<INT64>"), Some(WarehouseType::Array));
        assert_eq!(WarehouseType::parse("RECORD"), Some(WarehouseType::Struct));
        assert_eq!(WarehouseType::parse("VARCHAR"), None);
    }

    #[test]
    fn bool_is_comparable_but_not_orderable() {
        assert!(WarehouseType::Bool.supports_equality());
        assert!(!WarehouseType::Bool.supports_ordering());
        assert!(!WarehouseType::Json.supports_equality());
        assert!(WarehouseType::Timestamp.supports_ordering());
    }

    #[test]
    fn duplicate_detection_normalizes_names() {
        let p = ColumnProjection(vec!["id".into(), "Name".into(), " name ".into()]);
        assert_eq!(p.first_duplicate(), Some(" name "));

        let p = ColumnProjection(vec!["id".into(), "name".into()]);
        assert_eq!(p.first_duplicate(), None);
    }

    #[test]
    fn table_query_deserializes_with_defaults() {
        let q: TableQuery = serde_json::from_value(serde_json::json!({
            "dataset": "sales",
            "table": "orders",
            "filters": {
                "conditions": [{ "column": "id", "operator": "in", "values": ["1", "2"] }],
                "limit": 10
            },
            "order_by": [{ "column": "id", "direction": "desc" }]
        }))
        .unwrap();
        assert_eq!(q.filters.conditions[0].operator, FilterOperator::In);
        assert_eq!(q.filters.limit, Some(NumericInput::from(10)));
        assert_eq!(q.order_by[0].direction, SortDirection::Desc);
        assert!(q.columns.is_empty());
    }

    #[test]
    fn numeric_inputs_accept_numbers_and_strings() {
        let f: FilterSpec = serde_json::from_value(serde_json::json!({
            "change_since": 1700000000,
            "change_until": "1700003600",
            "limit": -1
        }))
        .unwrap();
        assert_eq!(f.change_since, Some(NumericInput::from(1_700_000_000)));
        assert_eq!(f.change_until, Some(NumericInput::from("1700003600")));
        assert_eq!(f.limit, Some(NumericInput::from(-1)));
        assert_eq!(f.limit.unwrap().to_string(), "-1");
    }

    #[test]
    fn cells_serialize_as_plain_values() {
        let row = MaterializedRow {
            cells: vec![
                MaterializedCell {
                    column_name: "a".into(),
                    value: CellValue::Null,
                    truncated: false,
                },
                MaterializedCell {
                    column_name: "b".into(),
                    value: CellValue::Native(serde_json::json!(3)),
                    truncated: false,
                },
            ],
        };
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!([
                { "column_name": "a", "value": null, "truncated": false },
                { "column_name": "b", "value": 3, "truncated": false }
            ])
        );
    }
}
