pub mod alerts;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod rest;
pub mod storage;
pub mod watchdog;

pub use error::MonitorError;

use std::sync::Arc;

use alerts::dispatcher::AlertDispatcher;
use alerts::notifier::Notifier;
use clock::Clock;
use config::MonitorConfig;
use ingest::IngestProcessor;
use registry::AgentRegistry;
use storage::Storage;

/// Shared application state passed to every HTTP handler and background task.
pub struct AppContext {
    pub config: Arc<MonitorConfig>,
    pub storage: Arc<Storage>,
    pub registry: Arc<AgentRegistry>,
    pub ingest: Arc<IngestProcessor>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub clock: Arc<dyn Clock>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire together storage, registry, dispatcher, and ingestion around an
    /// injected notifier and clock. Used by `main` and by integration tests
    /// (which inject a manual clock and a recording notifier).
    pub async fn init(
        config: MonitorConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let storage = Arc::new(
            Storage::new_with_slow_query(
                &config.data_dir,
                config.observability.slow_query_threshold_ms,
            )
            .await?,
        );
        let registry = Arc::new(AgentRegistry::new(storage.clone()));
        let dispatcher = Arc::new(AlertDispatcher::new(
            storage.clone(),
            notifier,
            clock.clone(),
            config.alerts.recipient.clone(),
            chrono::Duration::hours(config.alerts.repeat_interval_hours),
        ));
        let ingest = Arc::new(IngestProcessor::new(
            registry.clone(),
            dispatcher.clone(),
            clock.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            storage,
            registry,
            ingest,
            dispatcher,
            clock,
            started_at: std::time::Instant::now(),
        }))
    }
}
