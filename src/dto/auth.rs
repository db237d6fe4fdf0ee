use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::dto::common::PlayerSummary;

/// Request for a one-time sign-in link.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkRequest {
    #[validate(email)]
    pub email: String,
    /// Guest identity to upgrade once the link is verified.
    #[serde(default)]
    pub player_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MagicLinkResponse {
    pub sent: bool,
}

/// Exchange of a sign-in link token for a session token.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct VerifyRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub player: PlayerSummary,
    /// Session token, also set as a cookie.
    pub token: String,
}
