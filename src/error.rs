use serde_json::Value;

/// Failures surfaced by the API client. Every variant renders as a single
/// line suitable for showing to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connection refused, DNS, timeout and other transport failures.
    #[error("{0}")]
    Transport(String),
    /// Non-2xx response.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// Non-2xx response carrying an `errors` array of field failures.
    #[error("{0}")]
    Validation(String),
    #[error("Failed to parse response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
    #[error("Auth token unavailable: {0}")]
    Token(String),
    #[error("{0}")]
    Config(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl ApiError {
    /// Build the error for a failed response from its status line and body.
    ///
    /// A structured `errors` array (`[{path, msg}]`) becomes a
    /// [`ApiError::Validation`] with entries rendered as `path: msg` and joined
    /// by `", "`. Otherwise the body's `error` or `message` string is used,
    /// falling back to `"Request failed"`, or to `"HTTP {status}: {reason}"`
    /// when the body is not JSON at all.
    pub fn from_response(status: u16, reason: &str, body: &str) -> Self {
        let Ok(parsed) = serde_json::from_str::<Value>(body) else {
            return Self::Http {
                status,
                message: format!("HTTP {status}: {reason}"),
            };
        };

        if let Some(errors) = parsed.get("errors").and_then(Value::as_array) {
            let joined = errors
                .iter()
                .map(|e| format!("{}: {}", field(e, "path"), field(e, "msg")))
                .collect::<Vec<_>>()
                .join(", ");
            return Self::Validation(joined);
        }

        let message = ["error", "message"]
            .iter()
            .find_map(|k| parsed.get(k).and_then(Value::as_str).filter(|s| !s.is_empty()))
            .unwrap_or("Request failed")
            .to_string();
        Self::Http { status, message }
    }

    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn field(entry: &Value, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "undefined".to_string(),
        Some(other) => other.to_string(),
    }
}
