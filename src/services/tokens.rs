//! Signed session tokens (HS256 JWT) bound to a player id.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failures raised while issuing or validating a session token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to sign session token")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid session token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("session token subject `{0}` is not a player id")]
    Subject(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// Issues and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a token for `player_id` valid for `ttl`.
    pub fn issue(&self, player_id: Uuid, ttl: Duration) -> Result<String, AuthError> {
        let now = unix_seconds(SystemTime::now());
        let claims = Claims {
            sub: player_id.to_string(),
            iat: now,
            exp: now.saturating_add(ttl.as_secs()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(AuthError::Sign)
    }

    /// Validate signature and expiry, returning the player id the token was issued for.
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation).map_err(AuthError::Invalid)?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::Subject(data.claims.sub))
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
