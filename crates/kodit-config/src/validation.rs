//! Configuration validation

use crate::{AppConfig, ConfigError, ConfigResult};

/// Validate the full configuration, returning the first failure
pub fn validate(config: &AppConfig) -> ConfigResult<()> {
    if config.worker.count == 0 {
        return Err(ConfigError::Validation(
            "worker.count must be at least 1".to_string(),
        ));
    }

    if config.worker.retry_backoff < 1.0 {
        return Err(ConfigError::Validation(
            "worker.retry_backoff must be >= 1.0".to_string(),
        ));
    }

    if !(config.db_url.starts_with("sqlite:") || config.db_url.starts_with("postgres")) {
        return Err(ConfigError::InvalidValue {
            field: "db_url".to_string(),
            message: format!("unsupported database URL: {}", config.db_url),
        });
    }

    for (name, endpoint) in [
        ("embedding_endpoint", &config.embedding_endpoint),
        ("enrichment_endpoint", &config.enrichment_endpoint),
    ] {
        if endpoint.base_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("{name}.base_url"),
            });
        }
        if endpoint.model.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("{name}.model"),
            });
        }
        if endpoint.max_batch_chars == 0 {
            return Err(ConfigError::Validation(format!(
                "{name}.max_batch_chars must be positive"
            )));
        }
        if endpoint.num_parallel_tasks == 0 {
            return Err(ConfigError::Validation(format!(
                "{name}.num_parallel_tasks must be at least 1"
            )));
        }
    }

    if config.periodic_sync.enabled && config.periodic_sync.interval_seconds == 0 {
        return Err(ConfigError::Validation(
            "periodic_sync.interval_seconds must be positive when enabled".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base() -> AppConfig {
        AppConfig::for_tests(PathBuf::from("/tmp/kodit-validate"))
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = base();
        config.worker.count = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_db_url_rejected() {
        let mut config = base();
        config.db_url = "mysql://nope".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_chars_rejected() {
        let mut config = base();
        config.embedding_endpoint.max_batch_chars = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_periodic_sync_interval_checked_only_when_enabled() {
        let mut config = base();
        config.periodic_sync.interval_seconds = 0;
        assert!(validate(&config).is_ok());

        config.periodic_sync.enabled = true;
        assert!(validate(&config).is_err());
    }
}
