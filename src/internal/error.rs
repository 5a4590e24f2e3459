use std::collections::BTreeMap;

use reqwest::Response;
use thiserror::Error;

/// Per-field messages from a rejected write, keyed by form field.
/// `non_field_errors` and bare `detail` strings land under "general".
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response reached us at all. Retryable from the UI.
    #[error("could not reach the server")]
    Connectivity(#[source] reqwest::Error),

    /// Refresh was attempted and rejected. Terminal for the session; the
    /// credential store has already been cleared when this surfaces.
    #[error("session expired, sign in again")]
    AuthExpired,

    /// Structured 400 from a write, surfaced per-field to the form.
    #[error("the server rejected the submitted fields")]
    Validation(FieldErrors),

    #[error("not found")]
    NotFound,

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("unexpected response (HTTP {status})")]
    Unexpected { status: u16 },

    #[error("malformed response payload")]
    Decode(#[source] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Whether the UI may keep previously loaded data on screen and offer a
    /// retry, instead of resetting state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Connectivity(_) | ApiError::Server { .. } | ApiError::Unexpected { .. }
        )
    }
}

/// Map a non-success status onto the error taxonomy. The gateway has already
/// resolved auth rejection (one refresh + retry), so a 401 seen here is final.
pub async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status.as_u16() {
        400 => {
            let body = resp.text().await.unwrap_or_default();
            Err(ApiError::Validation(parse_field_errors(&body)))
        }
        401 => Err(ApiError::AuthExpired),
        404 => Err(ApiError::NotFound),
        status if status >= 500 => Err(ApiError::Server { status }),
        status => Err(ApiError::Unexpected { status }),
    }
}

/// Parse a DRF-style error body: `{"field": ["msg", ...], "detail": "..."}`.
/// Anything unparseable becomes a single "general" message.
pub fn parse_field_errors(body: &str) -> FieldErrors {
    let mut fields = FieldErrors::new();
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str(body) else {
        fields.insert("general".to_string(), vec!["request rejected".to_string()]);
        return fields;
    };
    for (key, value) in map {
        let target = match key.as_str() {
            "non_field_errors" | "detail" => "general".to_string(),
            _ => key,
        };
        let messages: Vec<String> = match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            serde_json::Value::String(message) => vec![message],
            other => vec![other.to_string()],
        };
        if !messages.is_empty() {
            fields.entry(target).or_default().extend(messages);
        }
    }
    if fields.is_empty() {
        fields.insert("general".to_string(), vec!["request rejected".to_string()]);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_per_field_lists() {
        let fields = parse_field_errors(
            r#"{"text": ["This field is required."], "guest_email": ["Enter a valid email."]}"#,
        );
        assert_eq!(fields["text"], vec!["This field is required."]);
        assert_eq!(fields["guest_email"], vec!["Enter a valid email."]);
    }

    #[test]
    fn folds_detail_and_non_field_errors_into_general() {
        let fields = parse_field_errors(
            r#"{"detail": "Throttled.", "non_field_errors": ["Captcha mismatch."]}"#,
        );
        let general = &fields["general"];
        assert!(general.contains(&"Throttled.".to_string()));
        assert!(general.contains(&"Captcha mismatch.".to_string()));
    }

    #[test]
    fn garbage_body_becomes_general_message() {
        let fields = parse_field_errors("<html>bad gateway</html>");
        assert!(fields.contains_key("general"));
    }
}
