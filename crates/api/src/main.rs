//! API server entry point.

use api::config::Config;
use tokio::signal;
use tokio::sync::watch;

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    api::telemetry::init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire collaborators, event log and saga
    let application = api::bootstrap::build(&config).await?;

    // 4. Consume order-created facts into payment placeholders
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let subscriber = application
        .state
        .saga
        .subscriber(application.event_log.clone(), config.fact_consumer_group.clone())
        .with_batch_size(config.fact_batch_size);
    let subscriber_task = tokio::spawn(subscriber.run(config.fact_poll_interval, shutdown_rx));

    // 5. Build the application
    let app = api::create_app(application.state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Stop the subscriber after the last request drained
    let _ = shutdown_tx.send(true);
    if let Err(e) = subscriber_task.await {
        tracing::error!(error = %e, "fact subscriber task failed");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
