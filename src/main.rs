use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info};

use blossom_api::{
    app_router, config, db,
    handlers::AppServices,
    rate_limiter::RateLimitConfig,
    services::gateway::GatewayClient,
    services::notifications::{MessageSink, NoopSink, TelegramSink},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!(
        environment = %cfg.environment,
        host = %cfg.host,
        port = cfg.port,
        "starting blossom-api"
    );

    let db = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
    if cfg.auto_migrate {
        db::ensure_schema(&db).await?;
    }

    let gateway = Arc::new(GatewayClient::new(cfg.gateway.clone())?);
    if cfg.gateway.terminal_password.is_none() {
        error!("gateway terminal password is not configured; payment webhooks will be discarded");
    }

    let sink: Arc<dyn MessageSink> = if cfg.notifier.is_configured() {
        let token = cfg.notifier.telegram_bot_token.clone().unwrap_or_default();
        let chat_id = cfg.notifier.telegram_chat_id.clone().unwrap_or_default();
        Arc::new(TelegramSink::new(token, chat_id)?)
    } else {
        info!("notifier is not configured; operator notifications go to the log");
        Arc::new(NoopSink)
    };

    let services = AppServices::new(
        db.clone(),
        gateway,
        sink,
        RateLimitConfig {
            requests_per_window: cfg.rate_limit_requests_per_window,
            window: Duration::from_secs(cfg.rate_limit_window_seconds),
        },
    );

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!("using permissive CORS (no explicit origins configured)");
        CorsLayer::permissive()
    } else {
        error!("missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        return Err(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
        );
    };

    let state = AppState {
        db,
        config: cfg.clone(),
        services,
    };

    let app = app_router(state)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

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
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
