//! FaturaForge Pipeline Worker
//!
//! Background processing service for uploaded invoices:
//! 1. Polls the invoice store for uploaded documents
//! 2. Claims each one and processes it as its own task
//! 3. Recognition -> structured extraction -> reconciled record
//!
//! Export to the ledger stays on demand, driven by the surrounding
//! application through `InvoiceProcessor::export_invoice`.

use faturaforge_common::{
    cache::RedisCache,
    completion::OpenAiCompletion,
    config::AppConfig,
    ledger::LedgerClient,
    metrics,
    models::InvoiceStatus,
    recognition::HttpRecognizer,
    store::{InMemoryFileStorage, InMemoryInvoiceStore, InvoiceStore},
    VERSION,
};
use faturaforge_pipeline::{extractor::StructuredExtractor, processor::InvoiceProcessor};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = VERSION, "Starting FaturaForge pipeline worker");

    // Initialize metrics
    metrics::register_metrics();

    // Shared token cache
    info!("Connecting to redis...");
    let cache = Arc::new(RedisCache::connect(&config.redis.url, &config.redis.key_prefix).await?);

    // Storage collaborators. Production deployments plug database-backed
    // implementations in here; the in-memory ones serve single-process runs.
    let store = Arc::new(InMemoryInvoiceStore::new());
    let files = Arc::new(InMemoryFileStorage::new());

    // Service clients, constructed once and injected
    let recognizer = Arc::new(HttpRecognizer::new(&config.recognition));
    let completion = Arc::new(OpenAiCompletion::new(&config.extraction)?);
    let ledger = Arc::new(LedgerClient::new(config.ledger.clone(), cache));
    let extractor = StructuredExtractor::new(completion, config.extraction.clone());

    let processor = Arc::new(InvoiceProcessor::new(
        store.clone(),
        files,
        recognizer,
        extractor,
        ledger,
        config.pipeline.clone(),
    ));

    let mut poll = tokio::time::interval(config.poll_interval());
    info!(
        poll_interval_secs = config.pipeline.poll_interval_secs,
        "Pipeline worker ready"
    );

    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            _ = poll.tick() => dispatch_pending(&store, &processor).await,
        }
    }

    info!("Pipeline worker shutting down");
    Ok(())
}

/// Claim every uploaded invoice and process each one in its own task
async fn dispatch_pending(store: &Arc<InMemoryInvoiceStore>, processor: &Arc<InvoiceProcessor>) {
    let pending = match store.list_by_status(InvoiceStatus::Uploaded).await {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, "Failed to list pending invoices");
            return;
        }
    };

    for record in pending {
        // Claiming before spawning keeps the next poll from double-dispatching
        if let Err(e) = processor.begin_processing(record.id).await {
            error!(invoice_id = %record.id, error = %e, "Failed to claim invoice");
            continue;
        }

        let processor = processor.clone();
        tokio::spawn(async move {
            if let Err(e) = processor.process(record.id).await {
                error!(invoice_id = %record.id, error = %e, "Invoice processing failed");
            }
        });
    }
}

/// Graceful shutdown signal handler
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
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
