use std::sync::Arc;

use session_service::{
    app,
    config::{AppState, EnvVars},
    manager::SessionManager,
    store::{MemoryStore, MongoStore, SessionStore},
    sweep::spawn_janitor,
};
use tokio::{signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        // Log to stdout
        .with(tracing_subscriber::fmt::layer().pretty())
        .with(sentry::integrations::tracing::layer())
        .init();

    info!("Starting exam session service...");
    let env_vars = EnvVars::new();

    let _guard = if let Some(sentry_dsn) = env_vars.sentry_dsn.clone() {
        info!("initializing Sentry");
        // NOTE: Events are only emitted, once the guard goes out of scope.
        Some(sentry::init((
            sentry_dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(env_vars.environment.to_string().into()),
                traces_sample_rate: 1.0,
                ..Default::default()
            },
        )))
    } else {
        None
    };

    match env_vars.mongodb_uri.clone() {
        Some(uri) => {
            let store = MongoStore::connect(&uri).await?;
            serve(store, env_vars).await
        }
        None => serve(MemoryStore::new(), env_vars).await,
    }
}

async fn serve<S: SessionStore>(store: S, env_vars: EnvVars) -> anyhow::Result<()> {
    let port = env_vars.port;
    let manager = Arc::new(SessionManager::new(store, &env_vars));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor = spawn_janitor(Arc::clone(&manager), env_vars.sweep_interval, shutdown_rx);

    let app_state = AppState { manager, env_vars };
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "listening");
    let server = axum::serve(listener, app(app_state)).with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("Server error: {}", err);
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = janitor.await {
        error!("janitor task failed: {:?}", e);
    }
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
