use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("overlap_secs ({overlap}) must be shorter than the tick period ({period}s)")]
    OverlapTooLong { overlap: u64, period: u64 },

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("Invalid vpc_proxy_pattern '{pattern}': {reason}")]
    InvalidProxyPattern { pattern: String, reason: String },

    #[error("invoke_endpoint '{0}' must contain a {{worker}} placeholder")]
    InvalidInvokeEndpoint(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_scheduler(config)?;
    validate_lifecycle(config)?;
    validate_storage(config)?;
    validate_dispatch(config)?;
    validate_queue(config)?;
    Ok(())
}

fn positive(value: u64, field: &'static str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::NotPositive { field });
    }
    Ok(())
}

fn validate_scheduler(config: &Config) -> Result<(), ValidationError> {
    let scheduler = &config.scheduler;
    positive(scheduler.system_periodicity, "scheduler.system_periodicity")?;
    positive(scheduler.monitor_frequency, "scheduler.monitor_frequency")?;
    positive(scheduler.min_poll_secs, "scheduler.min_poll_secs")?;

    let period = scheduler.period().as_secs();
    if scheduler.overlap_secs >= period {
        return Err(ValidationError::OverlapTooLong {
            overlap: scheduler.overlap_secs,
            period,
        });
    }
    Ok(())
}

fn validate_lifecycle(config: &Config) -> Result<(), ValidationError> {
    let lifecycle = &config.lifecycle;
    positive(lifecycle.disabler_look_back, "lifecycle.disabler_look_back")?;
    positive(lifecycle.enabler_look_back, "lifecycle.enabler_look_back")?;
    positive(lifecycle.disabler_interval_secs, "lifecycle.disabler_interval_secs")?;
    positive(lifecycle.enabler_interval_secs, "lifecycle.enabler_interval_secs")?;
    Ok(())
}

/// Validate storage credentials when provider is S3 (prod only; other modes use fixtures)
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    positive(config.storage.call_timeout_secs, "storage.call_timeout_secs")?;

    if config.mode.is_prod()
        && config.storage.provider == StorageProvider::S3
        && (config.storage.access_key.is_none() || config.storage.secret_key.is_none())
    {
        return Err(ValidationError::MissingS3Credentials);
    }
    Ok(())
}

fn validate_dispatch(config: &Config) -> Result<(), ValidationError> {
    let dispatch = &config.dispatch;
    if let Err(e) = regex::Regex::new(&dispatch.vpc_proxy_pattern) {
        return Err(ValidationError::InvalidProxyPattern {
            pattern: dispatch.vpc_proxy_pattern.clone(),
            reason: e.to_string(),
        });
    }
    if !dispatch.invoke_endpoint.contains("{worker}") {
        return Err(ValidationError::InvalidInvokeEndpoint(
            dispatch.invoke_endpoint.clone(),
        ));
    }
    positive(config.deadlines.dispatch_secs, "deadlines.dispatch_secs")?;
    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    positive(config.queue.workers as u64, "queue.workers")?;
    positive(config.queue.channel_size as u64, "queue.channel_size")?;
    positive(config.server.concurrency_limit as u64, "server.concurrency_limit")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_periodicity() {
        let mut config = Config::default();
        config.scheduler.system_periodicity = 0;

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::NotPositive { field: "scheduler.system_periodicity" })
        ));
    }

    #[test]
    fn test_overlap_longer_than_period() {
        let mut config = Config::default();
        config.scheduler.system_periodicity = 1;
        config.scheduler.overlap_secs = 60;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::OverlapTooLong { .. })
        ));
    }

    #[test]
    fn test_zero_look_back() {
        let mut config = Config::default();
        config.lifecycle.enabler_look_back = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::NotPositive { .. })
        ));
    }

    #[test]
    fn test_s3_credentials_missing() {
        let mut config = Config::default();
        config.storage.provider = StorageProvider::S3;
        config.storage.access_key = None;

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::MissingS3Credentials)));
    }

    #[test]
    fn test_invalid_proxy_pattern() {
        let mut config = Config::default();
        config.dispatch.vpc_proxy_pattern = "whirl(".to_string();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidProxyPattern { .. })
        ));
    }

    #[test]
    fn test_endpoint_without_worker_placeholder() {
        let mut config = Config::default();
        config.dispatch.invoke_endpoint = "http://localhost/invoke".to_string();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidInvokeEndpoint(_))
        ));
    }

    #[test]
    fn test_zero_workers() {
        let mut config = Config::default();
        config.queue.workers = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::NotPositive { field: "queue.workers" })
        ));
    }
}
