//! Vote session binary entrypoint wiring REST, SSE, the question source and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vote_session::{
    config::AppConfig,
    dao::session_store::{SessionStore, memory::MemorySessionStore},
    routes,
    services::{
        identity_service::IdentityProvider,
        question_source::{DeckQuestionSource, HttpQuestionSource, QuestionSource},
        session_client::ClientSettings,
        sse_events, storage_supervisor,
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let participant = IdentityProvider::new(&config.identity_path).get_or_create();
    info!(%participant, "device identity ready");

    let questions = build_question_source(&config)?;
    let settings = ClientSettings {
        reveal_debounce: config.reveal_debounce,
        join_timeout: config.join_timeout,
    };

    let app_state = AppState::new(participant, questions, settings);
    sse_events::spawn_status_relay(app_state.clone());
    spawn_store_supervisor(app_state.clone())?;

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
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

fn build_question_source(config: &AppConfig) -> anyhow::Result<Arc<dyn QuestionSource>> {
    match &config.question_endpoint {
        Some(endpoint) => {
            info!(%endpoint, "using remote question generator");
            let source = HttpQuestionSource::new(endpoint.clone(), config.question_timeout)
                .context("building question client")?;
            Ok(Arc::new(source))
        }
        None => {
            info!(count = config.questions.len(), "using built-in question deck");
            Ok(Arc::new(DeckQuestionSource::new(config.questions.clone())))
        }
    }
}

/// Pick the session store backend from `VOTE_SESSION_STORE` and supervise it
/// in the background, keeping the state degraded while it is unreachable.
fn spawn_store_supervisor(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("VOTE_SESSION_STORE").unwrap_or_else(|_| "memory".into());
    match backend.as_str() {
        "memory" => {
            warn!("using the in-process session store; sessions are not shared across devices");
            let store = MemorySessionStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok(Arc::new(store) as Arc<dyn SessionStore>) }
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use vote_session::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};

            let config = CouchConfig::from_env().context("reading CouchDB configuration")?;
            tokio::spawn(storage_supervisor::run(state, move || {
                let config = config.clone();
                async move {
                    let store = CouchSessionStore::connect(config).await?;
                    Ok(Arc::new(store) as Arc<dyn SessionStore>)
                }
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use vote_session::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoSessionStore::connect(config).await?;
                Ok(Arc::new(store) as Arc<dyn SessionStore>)
            }));
        }
        other => anyhow::bail!("unknown session store backend `{other}`"),
    }
    Ok(())
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
