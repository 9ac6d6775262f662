use tracing_subscriber::EnvFilter;

use stepwise_core::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        let config = LoggingConfig {
            level: "stepwise=debug".to_string(),
            json_format: false,
        };
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
