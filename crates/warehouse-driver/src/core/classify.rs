//! Retry decisions and message decoding for failed warehouse calls.
//!
//! The warehouse reports failures as a status code plus a message that is
//! either free text or a JSON envelope (`{"error": {"errors": [...]}}`). Both
//! shapes go through [`StructuredMessage::parse`] once and are then matched
//! exhaustively.

use serde_json::{Map, Value};

use super::types::ErrorClassification;

/// Status codes that are always worth another attempt.
const RETRYABLE_STATUS_CODES: [u16; 4] = [429, 500, 503, 401];

/// IAM changes on a freshly created dataset or principal are not visible yet.
const IAM_PROPAGATION_MARKER: &str = "IAM setPolicy failed for Dataset";

/// A newly created principal is not yet allowed to submit jobs.
const JOBS_CREATE_MARKER: &str = "bigquery.jobs.create";

const RETRYABLE_REASONS: [&str; 4] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "backendError",
    "jobRateLimitExceeded",
];

pub const TABLE_READ_MARKER: &str = "Error while reading table:";
const TABLE_READ_DETAIL: &str = ", error message:";

/// A raw warehouse message after one strict JSON decode.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredMessage {
    Object(Map<String, Value>),
    PlainText(String),
}

impl StructuredMessage {
    /// Anything that does not decode to a JSON object stays plain text.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => StructuredMessage::Object(map),
            _ => StructuredMessage::PlainText(raw.to_string()),
        }
    }

    fn to_log_string(&self) -> String {
        match self {
            StructuredMessage::Object(map) => {
                serde_json::to_string(map).unwrap_or_else(|_| format!("{map:?}"))
            }
            StructuredMessage::PlainText(text) => text.clone(),
        }
    }
}

fn decide(status_code: u16, raw_message: &str, message: &StructuredMessage) -> (bool, &'static str) {
    if RETRYABLE_STATUS_CODES.contains(&status_code) {
        return (true, "retryable status code");
    }
    if (200..300).contains(&status_code) {
        return (false, "success status code");
    }
    if raw_message.contains(IAM_PROPAGATION_MARKER) {
        return (true, "iam propagation");
    }
    if raw_message.contains(JOBS_CREATE_MARKER) {
        return (true, "jobs.create permission propagation");
    }

    let StructuredMessage::Object(map) = message else {
        return (false, "unstructured message");
    };
    let Some(errors) = map
        .get("error")
        .and_then(|e| e.get("errors"))
        .and_then(Value::as_array)
    else {
        return (false, "no error.errors array");
    };

    let retryable = errors.iter().any(|e| {
        e.get("reason")
            .and_then(Value::as_str)
            .is_some_and(|reason| RETRYABLE_REASONS.contains(&reason))
    });
    if retryable {
        (true, "retryable reason")
    } else {
        (false, "no retryable reason")
    }
}

/// Same decision as [`should_retry`], without the diagnostic log line.
pub fn is_retryable(status_code: u16, raw_message: &str) -> bool {
    decide(status_code, raw_message, &StructuredMessage::parse(raw_message)).0
}

/// Whether a failed warehouse call should be attempted again.
pub fn should_retry(status_code: u16, raw_message: &str) -> bool {
    let message = StructuredMessage::parse(raw_message);
    let (retry, rule) = decide(status_code, raw_message, &message);
    let message = message.to_log_string();
    if retry {
        tracing::info!(status_code, rule, error_message = %message, "retrying");
    } else {
        tracing::info!(status_code, rule, error_message = %message, "not retrying");
    }
    retry
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Most specific human-readable text in a warehouse error message.
pub fn decode_message(raw_message: &str) -> String {
    let map = match StructuredMessage::parse(raw_message) {
        StructuredMessage::Object(map) => map,
        StructuredMessage::PlainText(text) => return text,
    };

    if let Some(message) = map.get("message") {
        return value_text(message);
    }

    let error = match map.get("error") {
        None => return raw_message.to_string(),
        Some(Value::String(s)) => return s.clone(),
        Some(Value::Object(error)) => error,
        Some(_) => return raw_message.to_string(),
    };

    let fallback = || {
        error
            .get("message")
            .map(value_text)
            .unwrap_or_else(|| raw_message.to_string())
    };
    let element_message = |e: &Value| {
        e.get("message")
            .map(value_text)
            .unwrap_or_else(|| e.to_string())
    };

    match error.get("errors").and_then(Value::as_array).map(Vec::as_slice) {
        None | Some([]) => fallback(),
        Some([single]) => element_message(single),
        Some(many) => format!(
            "Errors: {}",
            many.iter().map(element_message).collect::<Vec<_>>().join("\n")
        ),
    }
}

/// Pulls `<detail>` out of `...Error while reading table: <table>, error message: <detail>`.
pub fn extract_direct_message(raw_message: &str) -> String {
    let Some(start) = raw_message.find(TABLE_READ_MARKER) else {
        return raw_message.to_string();
    };
    let rest = &raw_message[start + TABLE_READ_MARKER.len()..];
    match rest.find(TABLE_READ_DETAIL) {
        Some(pos) => {
            let detail = rest[pos + TABLE_READ_DETAIL.len()..].trim();
            if detail.is_empty() {
                raw_message.to_string()
            } else {
                detail.to_string()
            }
        }
        None => raw_message.to_string(),
    }
}

pub fn classify(status_code: u16, raw_message: &str) -> ErrorClassification {
    ErrorClassification {
        retryable: should_retry(status_code, raw_message),
        decoded_message: decode_message(raw_message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn retries_on_transient_status_codes() {
        for status in [429, 500, 503, 401] {
            assert!(should_retry(status, ""), "status {status}");
        }
    }

    #[test]
    fn never_retries_success_codes() {
        assert!(!should_retry(200, ""));
        assert!(!should_retry(204, r#"{"error":{"errors":[{"reason":"backendError"}]}}"#));
    }

    #[test]
    fn retries_on_propagation_markers() {
        assert!(should_retry(
            400,
            "IAM setPolicy failed for Dataset proj:ds: principal does not exist"
        ));
        assert!(should_retry(
            403,
            "Access Denied: Project p: User does not have bigquery.jobs.create permission"
        ));
    }

    #[test]
    fn retries_on_rate_limit_reasons() {
        assert!(should_retry(
            400,
            r#"{"error":{"errors":[{"reason":"rateLimitExceeded"}]}}"#
        ));
        assert!(should_retry(
            403,
            r#"{"error":{"errors":[{"reason":"invalid"},{"reason":"jobRateLimitExceeded"}]}}"#
        ));
    }

    #[test]
    fn does_not_retry_other_reasons_or_shapes() {
        assert!(!should_retry(
            400,
            r#"{"error":{"errors":[{"reason":"invalidQuery"}]}}"#
        ));
        assert!(!should_retry(400, "plain failure"));
        assert!(!should_retry(400, r#"{"error":"rateLimitExceeded"}"#));
        assert!(!should_retry(400, r#"{"error":{"errors":"backendError"}}"#));
        assert!(!should_retry(400, "[1, 2]"));
    }

    #[test]
    fn decode_plain_error_string() {
        assert_eq!(decode_message(r#"{"error":"my error"}"#), "my error");
    }

    #[test]
    fn decode_multiple_errors() {
        assert_eq!(
            decode_message(r#"{"error":{"errors":[{"message":"a"},{"message":"b"}]}}"#),
            "Errors: a\nb"
        );
    }

    #[test]
    fn decode_single_error() {
        assert_eq!(
            decode_message(r#"{"error":{"message":"outer","errors":[{"message":"inner"}]}}"#),
            "inner"
        );
    }

    #[test]
    fn decode_top_level_message() {
        assert_eq!(decode_message(r#"{"message":"Error msg","code":5}"#), "Error msg");
    }

    #[test]
    fn decode_is_identity_on_non_json() {
        assert_eq!(
            decode_message("garbage in, garbage out"),
            "garbage in, garbage out"
        );
        assert_eq!(decode_message("[1,2]"), "[1,2]");
        assert_eq!(decode_message(r#""quoted""#), r#""quoted""#);
    }

    #[test]
    fn decode_falls_back_to_error_message() {
        assert_eq!(decode_message(r#"{"error":{"message":"outer"}}"#), "outer");
        assert_eq!(
            decode_message(r#"{"error":{"message":"outer","errors":[]}}"#),
            "outer"
        );
        assert_eq!(
            decode_message(r#"{"error":{"message":"outer","errors":{}}}"#),
            "outer"
        );
    }

    #[test]
    fn decode_falls_back_to_raw() {
        let raw = r#"{"code":5}"#;
        assert_eq!(decode_message(raw), raw);
        let raw = r#"{"error":42}"#;
        assert_eq!(decode_message(raw), raw);
        let raw = r#"{"error":{"errors":[]}}"#;
        assert_eq!(decode_message(raw), raw);
    }

    #[test]
    fn extract_direct_message_returns_trailing_detail() {
        assert_eq!(
            extract_direct_message(
                "Failed: Error while reading table: ds.tbl, error message: Cannot query over table without a filter"
            ),
            "Cannot query over table without a filter"
        );
    }

    #[test]
    fn extract_direct_message_is_identity_otherwise() {
        assert_eq!(extract_direct_message("something else"), "something else");
        assert_eq!(
            extract_direct_message("Error while reading table: ds.tbl"),
            "Error while reading table: ds.tbl"
        );
    }

    #[test]
    fn classify_combines_decision_and_message() {
        let c = classify(
            400,
            r#"{"error":{"errors":[{"reason":"backendError","message":"try later"}]}}"#,
        );
        assert!(c.retryable);
        assert_eq!(c.decoded_message, "try later");
    }
}
