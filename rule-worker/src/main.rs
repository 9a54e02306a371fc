//! Consume the trade and bid streams and apply their rule engines.
use std::process::ExitCode;
use std::sync::Arc;

use common_kafka::kafka_source::KafkaConnector;
use common_kafka::ConnectionConfig;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rule_worker::config::Config;
use rule_worker::health::WorkerHealth;
use rule_worker::registry::WorkerRegistry;
use rule_worker::server::{app, serve, setup_metrics_recorder};
use rule_worker::signals::{wait_for_shutdown_signal, wait_for_stdin_line};
use rule_worker::supervisor::Supervisor;

fn build_registry(config: &Config) -> Result<WorkerRegistry> {
    let mut registry = WorkerRegistry::new();

    registry.register(
        "TradeConsumer",
        config.trade_topic.as_str(),
        ConnectionConfig::from_env_config(
            &config.kafka,
            &config.consumer,
            config.trade_consumer_group.as_str(),
        ),
        config.trade_engine.build(),
    )?;
    registry.register(
        "BidConsumer",
        config.bid_topic.as_str(),
        ConnectionConfig::from_env_config(
            &config.kafka,
            &config.consumer,
            config.bid_consumer_group.as_str(),
        ),
        config.bid_engine.build(),
    )?;

    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env().wrap_err("Invalid configuration")?;
    let registry = build_registry(&config).wrap_err("Invalid worker registry")?;
    let recorder_handle = setup_metrics_recorder().wrap_err("failed to install metrics recorder")?;

    let connector = Arc::new(KafkaConnector::new(config.consumer.connect_timeout()));
    let mut supervisor = Supervisor::new(Arc::new(registry), connector, config.worker_options());
    supervisor.start_all()?;

    let health = WorkerHealth::new(supervisor.state_handles());
    let shutdown = supervisor.shutdown_token();
    let bind = config.bind();
    let server = tokio::spawn(async move {
        let router = app(health, Some(recorder_handle));
        if let Err(e) = serve(router, &bind, async move { shutdown.cancelled().await }).await {
            error!("failed to serve health endpoints on {}: {}", bind, e);
        }
    });

    let stdin_trigger = config.shutdown_on_stdin;
    if stdin_trigger {
        info!("press enter or send SIGINT/SIGTERM to stop consumers");
    } else {
        info!("send SIGINT/SIGTERM to stop consumers");
    }
    supervisor
        .await_shutdown_signal(async move {
            if stdin_trigger {
                tokio::select! {
                    _ = wait_for_shutdown_signal() => {}
                    _ = wait_for_stdin_line() => {}
                }
            } else {
                wait_for_shutdown_signal().await
            }
        })
        .await;

    let report = supervisor.stop_all(config.shutdown_grace_period.0).await;
    if let Err(e) = server.await {
        error!("health server task ended abnormally: {}", e);
    }

    for worker in report.failed() {
        error!(worker = %worker.name, outcome = ?worker.outcome, "worker ended in failed state");
    }
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
