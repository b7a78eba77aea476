use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use kameo::Actor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod events;
mod health;
mod http;
mod messaging;
mod metrics;
mod models;
mod projection;
mod services;
mod storage;
mod utils;

use config::{Config, ServiceRole};
use health::{HealthMonitorActor, HealthReporter, HealthStatus, STORAGE_COMPONENT};
use messaging::{
    ensure_topic, ConsumerSettings, ConsumptionLoop, EventProducer, KafkaAdmin, KafkaEventSource,
    KafkaSink, LoopState, TopicSpec,
};
use metrics::Metrics;
use projection::{OrderReplicaProjector, Projector, UserReplicaProjector};
use services::{OrderService, UserService};
use storage::{InMemoryStore, OrderServiceStore, PostgresStore, UserServiceStore};

const PRODUCER_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=replica_sync=trace cargo run -- order-service
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,replica_sync=debug"))
        )
        .init();

    let config = Config::from_env(std::env::args().nth(1))?;
    tracing::info!(
        role = config.role.as_str(),
        bootstrap_servers = %config.bootstrap_servers,
        produce_topic = %config.produce_topic,
        consume_topic = %config.consume_topic,
        group_id = %config.group_id,
        "🚀 Starting replica sync service"
    );

    // === 1. Metrics, producer, health ===
    let metrics = Arc::new(Metrics::new()?);
    let sink = Arc::new(KafkaSink::new(&config.bootstrap_servers, PRODUCER_SEND_TIMEOUT)?);
    let producer = Arc::new(EventProducer::new(sink, metrics.clone()));

    let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new(config.role.as_str(), Some(producer.clone())));
    let health = HealthReporter::new(monitor);

    let admin = Arc::new(KafkaAdmin::new(config.bootstrap_servers.clone(), config.probe.attempt_timeout));
    let (started_tx, started_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_data = web::Data::new(metrics.clone());
    let health_data = web::Data::new(health.clone());
    let bind_addr = (config.http_host.clone(), config.http_port);

    // === 2. Role-specific storage, routes and consumer ===
    let (server, consumer) = match config.role {
        ServiceRole::User => {
            let store: Arc<dyn UserServiceStore> = match &config.database_url {
                Some(url) => Arc::new(PostgresStore::connect(url).await?),
                None => Arc::new(InMemoryStore::new()),
            };
            let service = web::Data::new(UserService::with_topic(
                store.clone(),
                producer.clone(),
                config.produce_topic.clone(),
            ));

            let server = HttpServer::new(move || {
                App::new()
                    .app_data(service.clone())
                    .app_data(metrics_data.clone())
                    .app_data(health_data.clone())
                    .configure(http::configure_users)
                    .configure(http::configure_ops)
            })
            .bind(bind_addr)?
            .run();

            let consumer = spawn_consumer(
                OrderReplicaProjector::new(store),
                &config,
                &metrics,
                &health,
                admin.clone(),
                started_rx,
                shutdown_rx,
            );
            (server, consumer)
        }
        ServiceRole::Order => {
            let store: Arc<dyn OrderServiceStore> = match &config.database_url {
                Some(url) => Arc::new(PostgresStore::connect(url).await?),
                None => Arc::new(InMemoryStore::new()),
            };
            let service = web::Data::new(OrderService::with_topic(
                store.clone(),
                producer.clone(),
                config.produce_topic.clone(),
            ));

            let server = HttpServer::new(move || {
                App::new()
                    .app_data(service.clone())
                    .app_data(metrics_data.clone())
                    .app_data(health_data.clone())
                    .configure(http::configure_orders)
                    .configure(http::configure_ops)
            })
            .bind(bind_addr)?
            .run();

            let consumer = spawn_consumer(
                UserReplicaProjector::new(store),
                &config,
                &metrics,
                &health,
                admin.clone(),
                started_rx,
                shutdown_rx,
            );
            (server, consumer)
        }
    };
    health.report(STORAGE_COMPONENT, HealthStatus::Healthy, None).await;
    tracing::info!(host = %config.http_host, port = config.http_port, "HTTP server bound");

    // === 3. Topic provisioning, then release the consumer ===
    ensure_topic(admin.as_ref(), &TopicSpec::new(config.produce_topic.clone()), &metrics).await;
    let server = actix_web::rt::spawn(server);
    started_tx.send_replace(true);

    // === 4. Serve until the server stops on SIGINT/SIGTERM ===
    let served = server.await;

    tracing::info!("Shutting down consumption loop");
    shutdown_tx.send_replace(true);
    match consumer.await {
        Ok(state) => tracing::info!(state = state.as_str(), "Consumption loop finished"),
        Err(e) => tracing::error!(error = %e, "Consumption loop task failed"),
    }

    served??;
    tracing::info!("👋 Shutdown complete");
    Ok(())
}

fn spawn_consumer<P: Projector>(
    projector: P,
    config: &Config,
    metrics: &Arc<Metrics>,
    health: &HealthReporter,
    admin: Arc<KafkaAdmin>,
    started: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<LoopState> {
    let consumption = ConsumptionLoop::new(projector, config.loop_config(), metrics.clone(), health.clone());
    let settings = ConsumerSettings {
        bootstrap_servers: config.bootstrap_servers.clone(),
        topic: config.consume_topic.clone(),
        group_id: config.group_id.clone(),
    };

    tokio::spawn(consumption.run(
        admin,
        move || KafkaEventSource::subscribe(&settings),
        started,
        shutdown,
    ))
}
