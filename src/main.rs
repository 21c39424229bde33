//! BinBroker - Binary Trading Simulation Backend
//! Mission: Settle every session exactly once and never lose a cent

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binbroker_backend::{
    api::{create_router, AppState},
    auth::JwtHandler,
    ledger::LedgerStore,
    market::PriceBoard,
    middleware::{rate_limit_middleware, request_logging, RateLimiter},
    models::Config,
    notify::Notifier,
    sessions::{ExpirySweeper, SessionStore, SettlementEngine},
    storage::Storage,
    transfers::TransferProcessor,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!("🚀 BinBroker backend starting");
    info!(
        db = %config.database_path,
        min_stake = %config.policy.min_stake,
        payout_ratio = %config.policy.payout_ratio,
        atomic_transfers = config.transfer_atomic,
        "Configuration loaded"
    );

    let storage = Storage::open(&config.database_path)
        .with_context(|| format!("open database at {}", config.database_path))?;

    let ledger = LedgerStore::new(storage.clone(), config.policy.starting_balance);
    let sessions = SessionStore::new(storage.clone());
    let prices = PriceBoard::new(config.policy.price_nudge_pct);
    let notifier = Notifier::new(256);

    let engine = SettlementEngine::new(
        storage.clone(),
        ledger.clone(),
        sessions.clone(),
        prices,
        notifier.clone(),
        config.policy.clone(),
    );
    let sweeper = ExpirySweeper::new(sessions.clone(), engine.clone());
    let transfers = TransferProcessor::new(
        storage,
        ledger.clone(),
        notifier.clone(),
        config.transfer_atomic,
    );

    // Default notification drain: log every settlement event so the channel
    // always has a consumer even without delivery plumbing attached.
    tokio::spawn(notification_drain(notifier.clone()));

    if config.metrics_enabled {
        let addr: SocketAddr = config
            .metrics_addr
            .parse()
            .with_context(|| format!("invalid METRICS_ADDR {}", config.metrics_addr))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install Prometheus exporter")?;
        info!("📊 Prometheus exporter listening on {}", addr);
    }

    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let limiter = RateLimiter::new(config.rate_limit_rpm);

    // Periodic cleanup of idle rate-limit windows.
    {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tick.tick().await;
                limiter.cleanup();
            }
        });
    }

    let state = AppState {
        ledger,
        sessions,
        engine,
        sweeper,
        transfers,
    };

    let app = create_router(state, jwt_handler)
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "binbroker_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Consume settlement events and log them. Real delivery plumbing would
/// subscribe alongside this task.
async fn notification_drain(notifier: Notifier) {
    let mut rx = notifier.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => info!(?event, "📨 Settlement notification"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "notification drain lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
