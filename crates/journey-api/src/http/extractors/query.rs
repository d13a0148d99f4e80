//! Query parameter extractors for list endpoints.

use serde::Deserialize;

/// Upper bound on `limit` for list endpoints.
pub const MAX_LIST_LIMIT: u32 = 500;

/// Query parameters for execution list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Filter by execution status (`pending`, `waiting`, ...).
    pub status: Option<String>,
}

fn default_limit() -> u32 {
    20
}

impl ListQuery {
    pub fn clamped_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// Query parameters for `POST /tick`.
#[derive(Debug, Deserialize, Default)]
pub struct TickQuery {
    /// `force` runs maintenance this tick, `skip` never does; otherwise sampled.
    pub maintenance: Option<String>,
}
