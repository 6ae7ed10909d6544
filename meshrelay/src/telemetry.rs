use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_metrics;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
pub enum MetricsInitError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Installs the tracing subscriber and, when a DSN is configured, the Sentry
/// client. The returned guard flushes Sentry on drop and must outlive the
/// runtime.
pub fn init_logging(
    config: Option<&LoggingConfig>,
    instance_id: &str,
) -> Option<sentry::ClientInitGuard> {
    let guard = config.and_then(|logging| {
        logging.sentry_dsn.as_deref().map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(logging.environment.clone().into()),
                    ..Default::default()
                },
            ))
        })
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    if guard.is_some() {
        sentry::configure_scope(|scope| scope.set_tag("instance_id", instance_id));
    }
    guard
}

pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsInitError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsInitError::AlreadyInstalled)?;

    describe_metrics(ingest::metrics_defs::ALL_METRICS);
    describe_metrics(dispatch::metrics_defs::ALL_METRICS);
    Ok(())
}
