use serde::Serialize;
use utoipa::ToSchema;

/// Storage reachability reported by `/healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` while the session store answers, `degraded` while it is unreachable or not yet
    /// connected.
    pub status: String,
}

impl HealthResponse {
    /// Session store installed and answering.
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }

    /// Session store missing or failing its health check; mutating routes answer 503.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".into(),
        }
    }
}
