//! Neon Expedition backend entrypoint wiring the REST API, auth collaborators and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use neon_expedition_back::{
    config::AppConfig,
    dao::session_store::memory::MemorySessionStore,
    routes,
    services::{
        notifier::{LogNotifier, Notifier},
        tokens::TokenSigner,
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let tokens = TokenSigner::new(&auth_secret());
    let notifier = build_notifier();

    let app_state = AppState::new(config, tokens, notifier);
    install_storage(app_state.clone()).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the in-memory store when `STORE_BACKEND=memory`, otherwise supervise MongoDB in the
/// background.
async fn install_storage(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_default();
    if backend.eq_ignore_ascii_case("memory") {
        warn!("using the in-memory store; data is lost on restart");
        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        return Ok(());
    }

    spawn_mongo_supervisor(state)
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: SharedState) -> anyhow::Result<()> {
    use neon_expedition_back::{
        dao::{
            session_store::{
                SessionStore,
                mongodb::{MongoConfig, MongoSessionStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    tokio::spawn(storage_supervisor::run(state, || async {
        let config = MongoConfig::from_env().await?;
        let store = MongoSessionStore::connect(config).await?;
        Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
    }));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: SharedState) -> anyhow::Result<()> {
    anyhow::bail!("built without `mongo-store`; set STORE_BACKEND=memory")
}

/// Signing key for session tokens; a random one is generated when `AUTH_SECRET` is unset.
fn auth_secret() -> Vec<u8> {
    match env::var("AUTH_SECRET") {
        Ok(secret) if !secret.is_empty() => secret.into_bytes(),
        _ => {
            warn!("AUTH_SECRET not set; generated an ephemeral key, sessions end on restart");
            rand::random::<[u8; 32]>().to_vec()
        }
    }
}

/// Deliver sign-in links through the HTTP mailer when `MAILER_URL` is configured.
fn build_notifier() -> Arc<dyn Notifier> {
    #[cfg(feature = "http-mailer")]
    {
        use neon_expedition_back::services::notifier::{HttpMailer, MailerConfig};

        match MailerConfig::from_env().and_then(HttpMailer::new) {
            Ok(mailer) => {
                info!("sign-in links delivered through the HTTP mailer");
                return Arc::new(mailer);
            }
            Err(err) => warn!(error = %err, "mailer not configured; logging sign-in links"),
        }
    }

    Arc::new(LogNotifier)
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
