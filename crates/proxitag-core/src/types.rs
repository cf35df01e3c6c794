//! Shared types and OpenAPI schemas.
//!
//! Most API types live next to the state they describe (see [`crate::state`]).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether a proximity session is currently running.
    #[schema(example = true)]
    pub scanning: bool,
}

impl HealthResponse {
    /// Healthy response for this build.
    #[must_use]
    pub fn ok(scanning: bool) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            scanning,
        }
    }
}
