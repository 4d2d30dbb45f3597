//! Orchestrator entry point.

use std::sync::Arc;

use flows::FlowSet;
use messaging::{Consumer, InMemoryBus, MessageProcessor, Publisher};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::AppState;
use orchestrator::config::Config;
use saga::{SagaFlowEngine, build_registry};
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Picks the bus backend: Kafka when compiled in and configured, otherwise
/// the in-process bus.
fn connect_bus(config: &Config) -> (Arc<dyn Publisher>, Box<dyn Consumer>) {
    #[cfg(feature = "kafka")]
    if let Some(servers) = &config.kafka_bootstrap_servers {
        use messaging::{KafkaConsumer, KafkaPublisher, KafkaSettings};

        let settings = KafkaSettings::new(servers, &config.kafka_group_id);
        let publisher = KafkaPublisher::new(&settings).expect("failed to create Kafka producer");
        let consumer = KafkaConsumer::new(&settings).expect("failed to create Kafka consumer");
        tracing::info!(%servers, group = %config.kafka_group_id, "using Kafka bus");
        return (Arc::new(publisher), Box::new(consumer));
    }

    #[cfg(not(feature = "kafka"))]
    if config.kafka_bootstrap_servers.is_some() {
        tracing::warn!("KAFKA_BOOTSTRAP_SERVERS is set but the kafka feature is not enabled");
    }

    tracing::info!("using in-process bus");
    let bus = InMemoryBus::new();
    let consumer = bus.consumer(config.kafka_group_id.clone());
    (Arc::new(bus), Box::new(consumer))
}

async fn run<S: SagaStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    // 1. Load flow definitions; a missing document leaves the engine idle
    let flows = Arc::new(FlowSet::load_or_empty(&config.flow_definition_path));

    // 2. Build the engine and the routing table derived from the flows
    let (publisher, mut consumer) = connect_bus(&config);
    let engine = Arc::new(SagaFlowEngine::new(
        Arc::clone(&flows),
        store,
        publisher,
        config.update_queue(),
    ));
    let registry = Arc::new(build_registry(&flows, Arc::clone(&engine)));
    let processor = MessageProcessor::new(registry, config.processor());

    // 3. Start consuming
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task =
        tokio::spawn(async move { processor.run(&mut *consumer, shutdown_rx).await });

    // 4. Serve HTTP until a shutdown signal arrives
    let app = orchestrator::create_app(AppState::new(Arc::clone(&engine)), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting orchestrator");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 5. Stop the consumer, then drain in-flight saga updates
    let _ = shutdown_tx.send(true);
    match consumer_task.await {
        Ok(Ok(())) => tracing::info!("consumer stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "consumer stopped with error"),
        Err(e) => tracing::error!(error = %e, "consumer task panicked"),
    }

    if engine.shutdown(config.shutdown_timeout).await {
        tracing::info!("saga updates drained");
    } else {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "saga updates still queued at shutdown timeout"
        );
    }

    tracing::info!("orchestrator shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Choose the saga store
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresSagaStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL saga store");
            run(config, store, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory saga store");
            run(config, InMemorySagaStore::new(), metrics_handle).await;
        }
    }
}
