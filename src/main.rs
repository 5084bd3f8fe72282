use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use receiptd::config::Config;
use receiptd::db::{create_pool, init_db, queries, AppState};
use receiptd::email::ResendMailer;
use receiptd::handlers;
use receiptd::storage::CloudinaryStore;
use receiptd::workers;

#[derive(Parser, Debug)]
#[command(name = "receiptd")]
#[command(about = "Payment webhook ingestion and receipt fulfillment pipeline")]
struct Cli {
    /// Serve the webhook endpoint without starting worker pools
    /// (useful when workers run in a separate process)
    #[arg(long)]
    no_workers: bool,

    /// Run one recovery sweep inline and exit
    #[arg(long)]
    recover_now: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::from_env();

    // The mode flag only toggles logging verbosity.
    let default_filter = if config.dev_mode {
        "receiptd=debug,tower_http=debug"
    } else {
        "receiptd=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    if config.allow_mock_webhooks {
        tracing::warn!("Mock webhooks enabled: the 'mock' provider bypasses signature checks");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        receipts_dir: config.receipts_dir.clone().into(),
        webhook_secrets: config.webhook_secrets.clone(),
        allow_mock_webhooks: config.allow_mock_webhooks,
        email_from: config.email_from.clone(),
        signed_url_ttl_secs: config.signed_url_ttl_secs,
        artifacts: Arc::new(CloudinaryStore::new(config.cloudinary.clone())),
        mailer: Arc::new(ResendMailer::new(config.resend_api_key.clone())),
    };

    if cli.recover_now {
        match workers::recovery::run_sweep(&state).await {
            Ok(summary) => {
                println!("Recovery sweep finished:");
                println!("  render re-enqueued: {}", summary.requeued_render);
                println!("  upload re-enqueued: {}", summary.requeued_upload);
                println!("  email re-enqueued:  {}", summary.requeued_email);
                println!("  critical failures:  {}", summary.critical_failures);
            }
            Err(e) => {
                eprintln!("Recovery sweep failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Purge expired audit rows on startup; the maintenance task keeps them
    // trimmed afterwards.
    {
        let conn = state.db.get().expect("Failed to get connection for purge");
        match queries::purge_expired_webhook_logs(&conn) {
            Ok(n) if n > 0 => tracing::info!("Purged {} expired webhook logs", n),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to purge webhook logs: {}", e),
        }
        match queries::purge_expired_job_logs(&conn) {
            Ok(n) if n > 0 => tracing::info!("Purged {} expired job logs", n),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to purge job logs: {}", e),
        }
    }

    if cli.no_workers {
        tracing::warn!("Worker pools disabled (--no-workers); receipts will not be fulfilled by this process");
    } else {
        workers::spawn_pools(&state);
        workers::spawn_maintenance(state.clone());
        workers::spawn_recovery_scheduler(state.clone());
    }

    let app = Router::new()
        .merge(handlers::webhooks::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("receiptd listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
