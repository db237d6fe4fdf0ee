//! Magic-link sign-in, session tokens and current-player resolution.

use std::{sync::Arc, time::SystemTime};

use axum::http::{HeaderMap, header};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::AuthConfig,
    dao::{
        models::{MagicTokenEntity, PlayerEntity},
        session_store::SessionStore,
    },
    dto::{
        auth::{MagicLinkRequest, MagicLinkResponse, VerifyRequest, VerifyResponse},
        common::PlayerSummary,
    },
    error::ServiceError,
    services::notifier::SignInLink,
    state::SharedState,
};

/// Create a single-use token for `request.email` and deliver it as a sign-in link.
pub async fn request_magic_link(
    state: &SharedState,
    request: MagicLinkRequest,
) -> Result<MagicLinkResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let config = &state.config().auth;
    let email = normalize_email(&request.email);

    let player_id = match request.player_id {
        Some(id) => store.find_player(id).await?.map(|player| player.id),
        None => None,
    };

    let token = generate_token();
    let now = SystemTime::now();
    store
        .insert_magic_token(MagicTokenEntity {
            token: token.clone(),
            email: email.clone(),
            player_id,
            expires_at: now + config.magic_token_ttl(),
            used_at: None,
        })
        .await?;

    let url = sign_in_url(&config.magic_link_base_url, &token);
    state
        .notifier()
        .send_sign_in_link(SignInLink {
            email: email.clone(),
            token,
            url,
        })
        .await
        .map_err(|err| ServiceError::Notification(err.to_string()))?;

    info!(email = %email, linked_player = ?player_id, "sign-in link sent");
    Ok(MagicLinkResponse { sent: true })
}

/// Exchange a sign-in link token for a session token, upgrading or creating the player.
pub async fn verify_magic_link(
    state: &SharedState,
    request: VerifyRequest,
) -> Result<VerifyResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let now = SystemTime::now();

    let magic = store
        .find_magic_token(request.token.clone())
        .await?
        .ok_or_else(invalid_link)?;
    if !magic.is_valid_at(now) {
        return Err(invalid_link());
    }
    if !store.consume_magic_token(magic.token.clone(), now).await? {
        return Err(invalid_link());
    }

    let player = player_for_verified_email(&store, &magic).await?;
    let token = state
        .tokens()
        .issue(player.id, state.config().auth.session_ttl())?;

    info!(player_id = %player.id, "player signed in");
    Ok(VerifyResponse {
        player: PlayerSummary::from(&player),
        token,
    })
}

/// Resolve the signed-in player from a bearer header or the session cookie.
pub async fn current_player(
    state: &SharedState,
    headers: &HeaderMap,
) -> Result<PlayerSummary, ServiceError> {
    let token = session_token(headers, &state.config().auth.cookie_name)
        .ok_or_else(|| ServiceError::Unauthorized("not signed in".into()))?;
    let player_id = state.tokens().verify(&token)?;

    let store = state.require_session_store().await?;
    let player = store
        .find_player(player_id)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("unknown player".into()))?;
    Ok(PlayerSummary::from(&player))
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(config: &AuthConfig, token: &str) -> String {
    cookie(config, token, config.session_ttl_secs)
}

/// `Set-Cookie` value removing the session cookie.
pub fn cleared_session_cookie(config: &AuthConfig) -> String {
    cookie(config, "", 0)
}

fn cookie(config: &AuthConfig, value: &str, max_age: u64) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.cookie_name, value, max_age
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    cookie
}

async fn player_for_verified_email(
    store: &Arc<dyn SessionStore>,
    magic: &MagicTokenEntity,
) -> Result<PlayerEntity, ServiceError> {
    if let Some(existing) = store.find_player_by_email(magic.email.clone()).await? {
        return Ok(existing);
    }

    if let Some(guest_id) = magic.player_id {
        if let Some(mut guest) = store.find_player(guest_id).await? {
            if guest.is_guest {
                guest.email = Some(magic.email.clone());
                guest.is_guest = false;
                guest.updated_at = SystemTime::now();
                match store.update_player(guest.clone()).await {
                    Ok(true) => {
                        info!(player_id = %guest.id, "guest upgraded to registered player");
                        return Ok(guest);
                    }
                    Ok(false) => {}
                    Err(err) if err.is_duplicate() => {
                        return registered_by_email(store, &magic.email, err.into()).await;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    let display_name = magic
        .email
        .split('@')
        .next()
        .filter(|local| !local.is_empty())
        .unwrap_or("player")
        .to_string();
    let player = PlayerEntity::registered(Uuid::new_v4(), display_name, magic.email.clone());
    match store.insert_player(player.clone()).await {
        Ok(()) => {
            info!(player_id = %player.id, "registered player created");
            Ok(player)
        }
        Err(err) if err.is_duplicate() => {
            registered_by_email(store, &magic.email, err.into()).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Another request registered `email` first; use that player.
async fn registered_by_email(
    store: &Arc<dyn SessionStore>,
    email: &str,
    fallback: ServiceError,
) -> Result<PlayerEntity, ServiceError> {
    debug!(email = %email, "email registered concurrently");
    store
        .find_player_by_email(email.to_string())
        .await?
        .ok_or(fallback)
}

fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sign_in_url(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}token={token}")
}

fn invalid_link() -> ServiceError {
    ServiceError::Unauthorized("sign-in link is invalid, expired or already used".into())
}
