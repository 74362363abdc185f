use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid coordinator url scheme in '{url}', expected 'ws://' or 'wss://'")]
    InvalidCoordinatorScheme { url: String },

    #[error("Duration must be positive: {field}")]
    ZeroDuration { field: &'static str },

    #[error("Reconnect min_interval ({min}) exceeds max_interval ({max})")]
    ReconnectIntervalOrder { min: String, max: String },

    #[error("Reconnect factor must be >= 1.0, got {0}")]
    InvalidReconnectFactor(f64),

    #[error("Worker setting must be positive: {field}")]
    ZeroWorkerSetting { field: &'static str },

    #[error("Authorization token is empty")]
    EmptyAuthToken,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_coordinator(config)?;
    validate_reconnect(config)?;
    validate_workers(config)?;
    Ok(())
}

fn validate_coordinator(config: &Config) -> Result<(), ValidationError> {
    let coordinator = &config.coordinator;

    if !(coordinator.url.starts_with("ws://") || coordinator.url.starts_with("wss://")) {
        return Err(ValidationError::InvalidCoordinatorScheme {
            url: coordinator.url.clone(),
        });
    }

    if coordinator.handshake_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "coordinator.handshake_timeout",
        });
    }

    if coordinator.liveness_backoff.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "coordinator.liveness_backoff",
        });
    }

    // Absent is allowed here (checked at client start), blank is not
    if let Some(token) = &coordinator.auth_token {
        if token.trim().is_empty() {
            return Err(ValidationError::EmptyAuthToken);
        }
    }

    Ok(())
}

fn validate_reconnect(config: &Config) -> Result<(), ValidationError> {
    let reconnect = &config.coordinator.reconnect;

    if reconnect.min_interval.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "coordinator.reconnect.min_interval",
        });
    }

    if reconnect.min_interval > reconnect.max_interval {
        return Err(ValidationError::ReconnectIntervalOrder {
            min: reconnect.min_interval.to_string(),
            max: reconnect.max_interval.to_string(),
        });
    }

    if !reconnect.factor.is_finite() || reconnect.factor < 1.0 {
        return Err(ValidationError::InvalidReconnectFactor(reconnect.factor));
    }

    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    if config.workers.count == 0 {
        return Err(ValidationError::ZeroWorkerSetting {
            field: "workers.count",
        });
    }

    if config.workers.dispatch_capacity == 0 {
        return Err(ValidationError::ZeroWorkerSetting {
            field: "workers.dispatch_capacity",
        });
    }

    if config.workers.poll_interval.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "workers.poll_interval",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;

    #[test]
    fn test_valid_default_config() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_http_scheme() {
        let mut config = Config::default();
        config.coordinator.url = "http://localhost:8080/ws/worker".to_string();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidCoordinatorScheme { .. })
        ));
    }

    #[test]
    fn test_rejects_inverted_reconnect_bounds() {
        let mut config = Config::default();
        config.coordinator.reconnect.min_interval = HumanDuration::from_secs(60);
        config.coordinator.reconnect.max_interval = HumanDuration::from_secs(5);

        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ValidationError::ReconnectIntervalOrder { .. }));
        assert!(err.to_string().contains("1m"));
    }

    #[test]
    fn test_rejects_shrinking_factor() {
        let mut config = Config::default();
        config.coordinator.reconnect.factor = 0.5;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidReconnectFactor(_))
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::default();
        config.workers.count = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroWorkerSetting { field: "workers.count" })
        ));
    }

    #[test]
    fn test_rejects_zero_liveness_backoff() {
        let mut config = Config::default();
        config.coordinator.liveness_backoff = HumanDuration::from_millis(0);

        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroDuration { .. })
        ));
    }

    #[test]
    fn test_rejects_blank_token() {
        let mut config = Config::default();
        config.coordinator.auth_token = Some("   ".to_string());

        assert!(matches!(validate(&config), Err(ValidationError::EmptyAuthToken)));
    }
}
