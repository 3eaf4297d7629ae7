use std::sync::Arc;

use zapgate::api::{self, AppState};
use zapgate::config::GatewayConfig;
use zapgate::dispatch::Dispatcher;
use zapgate::export::ExportService;
use zapgate::providers::ProviderRegistry;
use zapgate::queue::DurableQueue;
use zapgate::store::{Database, LibSqlBackend};
use zapgate::webhook::{InboundNotification, WebhookHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(GatewayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ZAPGATE_VERIFY_TOKEN=<webhook verify secret>");
        std::process::exit(1);
    }));

    eprintln!("📨 Zapgate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/v1/whatsapp", config.port);
    eprintln!("   Database: {}", config.db_path);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(
        |e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        },
    ));

    // ── Core services ────────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::new(config.provider_endpoints()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&db), providers));

    let (notify_tx, mut notify_rx) = tokio::sync::broadcast::channel::<InboundNotification>(256);
    let webhooks = Arc::new(WebhookHandler::new(
        Arc::clone(&db),
        Arc::clone(&dispatcher),
        notify_tx,
    ));

    let queue = Arc::new(DurableQueue::new(Arc::clone(&db)));
    let exports = Arc::new(ExportService::new(Arc::clone(&db), queue));

    // Log inbound notifications; socket consumers subscribe to the same
    // channel through the webhook handler.
    tokio::spawn(async move {
        loop {
            match notify_rx.recv().await {
                Ok(notification) => {
                    tracing::info!(
                        tenant_id = %notification.tenant_id,
                        from = %notification.from,
                        "Inbound message received"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification consumer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── HTTP server ──────────────────────────────────────────────────────
    let state = AppState {
        db,
        dispatcher,
        webhooks,
        exports,
        config: Arc::clone(&config),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
