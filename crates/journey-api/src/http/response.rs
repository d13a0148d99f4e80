//! Envelope response format for all API responses.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

/// Envelope wrapping every API payload.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    pub meta: ApiMeta,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    pub timestamp: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code, e.g. `EXECUTION_NOT_FOUND`.
    pub code: String,
    pub message: String,
}

/// Start-of-request marker used to fill in `meta`.
pub struct RequestTimer {
    request_id: String,
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            start: Instant::now(),
        }
    }

    fn meta(&self) -> ApiMeta {
        ApiMeta {
            request_id: self.request_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, timer: &RequestTimer) -> Self {
        Self {
            data: Some(data),
            meta: timer.meta(),
            errors: Vec::new(),
            links: HashMap::new(),
        }
    }

    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

impl ApiResponse<()> {
    /// An error envelope (no data).
    pub fn error(code: &str, message: String) -> Self {
        Self {
            data: None,
            meta: ApiMeta {
                request_id: Uuid::now_v7().to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: 0,
            },
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message,
            }],
            links: HashMap::new(),
        }
    }
}
