use super::types::NumericInput;
use crate::error::{AppError, AppResult};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Preview values longer than this many characters are cut.
pub const PREVIEW_VALUE_WIDTH: usize = 50;

/// Absent or 0 maps to the default; anything outside `0..=MAX_LIMIT` or not
/// an integer is a validation error.
pub fn effective_limit(requested: Option<&NumericInput>) -> AppResult<u32> {
    let Some(raw) = requested else {
        return Ok(DEFAULT_LIMIT);
    };
    let parsed = match raw {
        NumericInput::Number(n) => n.as_i64(),
        NumericInput::Text(s) => s.trim().parse::<i64>().ok(),
    };
    let n = parsed
        .ok_or_else(|| AppError::validation(format!("limit must be an integer, got `{raw}`")))?;

    match n {
        0 => Ok(DEFAULT_LIMIT),
        n if n < 0 => Err(AppError::validation(format!(
            "limit must not be negative, got {n}"
        ))),
        n if n > i64::from(MAX_LIMIT) => Err(AppError::validation(format!(
            "limit {n} exceeds the maximum of {MAX_LIMIT}"
        ))),
        n => Ok(n as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn limit(v: impl Into<NumericInput>) -> AppResult<u32> {
        effective_limit(Some(&v.into()))
    }

    #[test]
    fn zero_or_absent_means_default() {
        assert_eq!(effective_limit(None).unwrap(), DEFAULT_LIMIT);
        assert_eq!(limit(0).unwrap(), DEFAULT_LIMIT);
    }

    #[test]
    fn bounds_are_inclusive() {
        assert_eq!(limit(1).unwrap(), 1);
        assert_eq!(limit(i64::from(MAX_LIMIT)).unwrap(), MAX_LIMIT);
        assert!(limit(i64::from(MAX_LIMIT) + 1).is_err());
    }

    #[test]
    fn numeric_strings_are_accepted() {
        assert_eq!(limit(" 25 ").unwrap(), 25);
    }

    #[test]
    fn malformed_limits_are_validation_errors() {
        for bad in [
            NumericInput::from(-1),
            NumericInput::from(i64::MAX),
            NumericInput::from("ten"),
            NumericInput::Number(serde_json::Number::from_f64(2.5).unwrap()),
        ] {
            let err = effective_limit(Some(&bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{bad}");
        }
    }
}
