use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

/// Pulls a human-readable message out of an upstream error body, falling back
/// to a truncated copy of the raw body.
pub fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("detail")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            })
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_nested_error_message() {
        let (message, _) =
            summarize_error_body(r#"{"error": {"code": 400, "message": "API key not valid"}}"#);
        assert_eq!(message.as_deref(), Some("API key not valid"));
    }

    #[test]
    fn reads_fastapi_style_detail() {
        let (message, _) = summarize_error_body(r#"{"detail": "CUDA out of memory"}"#);
        assert_eq!(message.as_deref(), Some("CUDA out of memory"));
    }

    #[test]
    fn keeps_plain_text_bodies() {
        let (message, summary) = summarize_error_body("  upstream exploded  ");
        assert!(message.is_none());
        assert_eq!(summary, "upstream exploded");
    }

    #[test]
    fn truncates_long_values_on_char_boundaries() {
        let value = "é".repeat(10);
        assert_eq!(truncate_for_log(&value, 3), "ééé... (truncated)");
        assert_eq!(truncate_for_log("short", 10), "short");
    }
}
