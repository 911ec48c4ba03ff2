use serde_json::Value;

use super::{
    limits::PREVIEW_VALUE_WIDTH,
    types::{CellValue, MaterializedCell, MaterializedRow, QueryMode, RawRow},
};
use crate::error::{AppError, AppResult};

/// Shapes one warehouse row for the response, in `columns` order.
///
/// `columns` is the resolved projection (see `CompiledQuery::columns`). A
/// column missing from `raw` means the caller paired the wrong query and
/// rows, and is reported as an internal error.
pub fn materialize(mode: QueryMode, raw: &RawRow, columns: &[String]) -> AppResult<MaterializedRow> {
    let cells = columns
        .iter()
        .map(|name| {
            let value = raw.get(name).ok_or_else(|| {
                AppError::internal(format!("column `{name}` missing from warehouse row"))
            })?;
            Ok(cell(mode, name, value))
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(MaterializedRow { cells })
}

pub fn materialize_rows(
    mode: QueryMode,
    rows: &[RawRow],
    columns: &[String],
) -> AppResult<Vec<MaterializedRow>> {
    rows.iter()
        .map(|raw| materialize(mode, raw, columns))
        .collect()
}

fn cell(mode: QueryMode, name: &str, value: &Value) -> MaterializedCell {
    let (value, truncated) = match (mode, value) {
        (_, Value::Null) => (CellValue::Null, false),
        (QueryMode::Select, v) => (CellValue::Native(v.clone()), false),
        (QueryMode::Preview, v) => {
            let (text, truncated) = truncate(stringify(v));
            (CellValue::Text(text), truncated)
        }
    };
    MaterializedCell {
        column_name: name.to_string(),
        value,
        truncated,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(mut text: String) -> (String, bool) {
    match text.char_indices().nth(PREVIEW_VALUE_WIDTH) {
        Some((cut, _)) => {
            text.truncate(cut);
            (text, true)
        }
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn preview_truncates_long_values_to_fifty_chars() {
        let long = "x".repeat(40) + &"y".repeat(20);
        let raw = row(&[("a", json!(long))]);
        let out = materialize(QueryMode::Preview, &raw, &cols(&["a"])).unwrap();
        let cell = &out.cells[0];
        assert!(cell.truncated);
        assert_eq!(cell.value, CellValue::Text(long[..50].to_string()));
    }

    #[test]
    fn preview_keeps_short_values() {
        let raw = row(&[("a", json!("0123456789"))]);
        let out = materialize(QueryMode::Preview, &raw, &cols(&["a"])).unwrap();
        assert!(!out.cells[0].truncated);
        assert_eq!(out.cells[0].value, CellValue::Text("0123456789".into()));
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let text = "é".repeat(55);
        let raw = row(&[("a", json!(text))]);
        let out = materialize(QueryMode::Preview, &raw, &cols(&["a"])).unwrap();
        assert_eq!(out.cells[0].value, CellValue::Text("é".repeat(50)));
        assert!(out.cells[0].truncated);
    }

    #[test]
    fn preview_stringifies_scalars() {
        let raw = row(&[("n", json!(42)), ("b", json!(true)), ("o", json!({"k": 1}))]);
        let out = materialize(QueryMode::Preview, &raw, &cols(&["n", "b", "o"])).unwrap();
        let values: Vec<_> = out.cells.iter().map(|c| c.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                CellValue::Text("42".into()),
                CellValue::Text("true".into()),
                CellValue::Text(r#"{"k":1}"#.into()),
            ]
        );
    }

    #[test]
    fn nulls_stay_null_in_both_modes() {
        let raw = row(&[("a", Value::Null)]);
        for mode in [QueryMode::Preview, QueryMode::Select] {
            let out = materialize(mode, &raw, &cols(&["a"])).unwrap();
            assert_eq!(out.cells[0].value, CellValue::Null);
            assert!(!out.cells[0].truncated);
        }
    }

    #[test]
    fn export_passes_native_values_untouched() {
        let long = "z".repeat(80);
        let raw = row(&[("a", json!(long)), ("n", json!(1.5))]);
        let out = materialize(QueryMode::Select, &raw, &cols(&["n", "a"])).unwrap();
        assert_eq!(out.cells[0].value, CellValue::Native(json!(1.5)));
        assert_eq!(out.cells[1].value, CellValue::Native(json!(long)));
        assert!(!out.cells[1].truncated);
    }

    #[test]
    fn output_follows_requested_column_order() {
        let raw = row(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]);
        let out = materialize(QueryMode::Select, &raw, &cols(&["c", "a"])).unwrap();
        let names: Vec<_> = out.cells.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn missing_column_is_an_internal_error() {
        let raw = row(&[("a", json!(1))]);
        let err = materialize(QueryMode::Select, &raw, &cols(&["b"])).unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
    }
}
