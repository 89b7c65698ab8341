mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use eventify_api::media::DiskMediaStore;
use eventify_api::notify::Notifier;
use eventify_api::notify::mailer::{LogMailer, Mailer, SmtpConfig, SmtpMailer};
use eventify_api::payments::gateway::StripeGateway;
use eventify_api::{AppState, AppStateInner, routes};
use eventify_db::Database;
use eventify_gateway::{Dispatcher, connection};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventify=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    let mailer: Arc<dyn Mailer> = match config.smtp {
        Some(smtp) => {
            info!("Sending ticket email through {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(SmtpConfig {
                host: smtp.host,
                port: smtp.port,
                username: smtp.username,
                password: smtp.password,
                from: smtp.from,
            })?)
        }
        None => {
            warn!("SMTP is not configured; ticket emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    if config.stripe_secret_key.is_none() {
        warn!("STRIPE_SECRET_KEY is not set; payment routes will fail");
    }
    if config.stripe_webhook_secret.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET is not set; every webhook will be rejected");
    }

    let media = DiskMediaStore::new(config.media_dir.clone(), &config.public_url).await?;

    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret,
        token_ttl: chrono::Duration::hours(config.token_ttl_hours),
        allow_admin_signup: config.allow_admin_signup,
        dispatcher: Dispatcher::new(),
        notifier: Notifier::spawn(mailer, db),
        payments: Arc::new(StripeGateway::new(
            config.stripe_secret_key,
            &config.stripe_api_base,
        )),
        webhook_secret: config.stripe_webhook_secret,
        currency: config.currency,
        frontend_url: config.frontend_url,
        media: Arc::new(media),
    });

    let realtime = Router::new()
        .route("/", get(|| async { "Eventify API is running" }))
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(routes::router(state))
        .merge(realtime)
        .nest_service("/uploads", ServeDir::new(&config.media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Eventify server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Eventify server stopped");
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "observers": state.dispatcher.observer_count().await,
    }))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
