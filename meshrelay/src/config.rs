use dispatch::config::Config as DispatchConfig;
use ingest::config::{Config as IngestConfig, Listener};
use serde::Deserialize;
use std::fs::File;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "meshrelay".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "development".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Transport bridge endpoint
    pub listener: Listener,
    /// Health and readiness endpoints
    pub admin_listener: Listener,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub dispatch: DispatchConfig,
    pub logging: Option<LoggingConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.ingest.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid ingest config: {0}")]
    Ingest(#[from] ingest::config::ValidationError),
    #[error("invalid dispatch config: {0}")]
    Dispatch(#[from] dispatch::config::ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            listener:
                host: 0.0.0.0
                port: 8080
            admin_listener:
                host: 127.0.0.1
                port: 8081
            ingest:
                grouping_window_ms: 10000
                watched_nodes: ["!43b6ff0c"]
            dispatch:
                environment: production
                webhooks:
                    primary: https://discord.com/api/webhooks/1/a
                topics:
                    primary: [msh/US/CA/socalmesh]
                    private: [msh/US/CA/SacValley]
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        config.validate().expect("valid config");

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.ingest.flush_interval_ms, 5000);
        assert_eq!(config.dispatch.topics.all().len(), 2);
        let logging = config.logging.expect("logging config");
        assert_eq!(logging.environment, "development");
        assert_eq!(config.metrics.expect("metrics config").prefix, "meshrelay");
    }

    #[test]
    fn missing_primary_webhook() {
        let yaml = r#"
            listener: {host: 0.0.0.0, port: 8080}
            admin_listener: {host: 127.0.0.1, port: 8081}
            dispatch:
                topics:
                    primary: [msh/US/CA/socalmesh]
            "#;
        let tmp = write_tmp_file(yaml);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn invalid_values() {
        let yaml = r#"
            listener: {host: 0.0.0.0, port: 0}
            admin_listener: {host: 127.0.0.1, port: 8081}
            dispatch:
                webhooks: {primary: "https://discord.com/api/webhooks/1/a"}
                topics: {primary: [msh/US/CA/socalmesh]}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(config.validate(), Err(ConfigError::Ingest(_))));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            Config::from_file(&dir.path().join("nope.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
