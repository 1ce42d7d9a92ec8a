use crate::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Registry};

pub fn init(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(config)?;
    if let Some(port) = config.metrics_port {
        init_metrics(port)?;
    }
    Ok(())
}

fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_target(true);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "message_inconsistencies=info".into());

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!(service = %config.service_name, "Tracing initialized");
    Ok(())
}

fn init_metrics(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    tracing::info!("Metrics exporter (Prometheus) started on port {}", port);
    Ok(())
}
