use serde_json::Value;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Canonical reason phrase for a status code, `"Unknown"` if there is none.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Response produced by the gateway before it is written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// JSON body with `Content-Type: application/json`.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", CONTENT_TYPE_JSON)
            .with_body(body.to_string().into_bytes())
    }

    /// `{"error": <kind>, "message": <message>}` plus any extra members of `details`.
    #[must_use]
    pub fn json_error(status: u16, kind: &str, message: &str, details: Option<Value>) -> Self {
        let mut body = serde_json::json!({
            "error": kind,
            "message": message,
        });
        if let (Some(Value::Object(extra)), Value::Object(map)) = (details, &mut body) {
            map.extend(extra);
        }
        Self::json(status, &body)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON, `Value::Null` if it is not JSON.
    #[must_use]
    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}
