use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Process-wide settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub image_prefix: String,
    pub concurrent_limit: usize,
    pub default_timeout: u64,
    pub max_timeout: u64,
    pub max_code_len: usize,
    pub max_output_bytes: usize,
    pub rate_limit_per_min: u32,
    pub rate_limit_burst: u32,
    pub scratch_root: PathBuf,
    pub fallback_enabled: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_var("PORT", 8081u16)?;
        let image_prefix = std::env::var("IMAGE_PREFIX").unwrap_or_default();
        let concurrent_limit = parse_var("CONCURRENT_LIMIT", 10usize)?;
        if concurrent_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "CONCURRENT_LIMIT must be at least 1".to_string(),
            ));
        }

        let max_timeout = parse_var("MAX_TIMEOUT", 30u64)?;
        // DEFAULT_TIMEOUT is clamped to the maximum rather than rejected.
        let default_timeout = parse_var("DEFAULT_TIMEOUT", 10u64)?.min(max_timeout);
        if default_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_TIMEOUT must be at least 1 second".to_string(),
            ));
        }

        let max_code_len = parse_var("MAX_CODE_LEN", 65536usize)?;
        let max_output_bytes = parse_var("MAX_OUTPUT_BYTES", 65536usize)?;
        let rate_limit_per_min = parse_var("RATE_LIMIT_PER_MIN", 30u32)?;
        let rate_limit_burst = parse_var("RATE_LIMIT_BURST", 10u32)?;
        if rate_limit_per_min == 0 || rate_limit_burst == 0 {
            return Err(ConfigError::InvalidValue(
                "rate limit parameters must be at least 1".to_string(),
            ));
        }

        let scratch_root = std::env::var("SCRATCH_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let fallback_enabled = std::env::var("FALLBACK_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Settings {
            port,
            image_prefix,
            concurrent_limit,
            default_timeout,
            max_timeout,
            max_code_len,
            max_output_bytes,
            rate_limit_per_min,
            rate_limit_burst,
            scratch_root,
            fallback_enabled,
        })
    }

    /// Effective execution deadline for a request.
    ///
    /// Absent timeouts fall back to the default; present ones are clamped to
    /// `[1, MAX_TIMEOUT]` so a client can shorten but never extend past the cap.
    pub fn effective_timeout(&self, requested: Option<u64>) -> Duration {
        let secs = requested
            .unwrap_or(self.default_timeout)
            .clamp(1, self.max_timeout);
        Duration::from_secs(secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8081,
            image_prefix: String::new(),
            concurrent_limit: 10,
            default_timeout: 10,
            max_timeout: 30,
            max_code_len: 65536,
            max_output_bytes: 65536,
            rate_limit_per_min: 30,
            rate_limit_burst: 10,
            scratch_root: std::env::temp_dir(),
            fallback_enabled: false,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a number, got '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8081);
        assert_eq!(settings.concurrent_limit, 10);
        assert_eq!(settings.default_timeout, 10);
        assert_eq!(settings.max_timeout, 30);
        assert!(!settings.fallback_enabled);
    }

    #[test]
    fn test_effective_timeout_absent_uses_default() {
        let settings = Settings::default();
        assert_eq!(settings.effective_timeout(None), Duration::from_secs(10));
    }

    #[test]
    fn test_effective_timeout_clamps_to_max() {
        let settings = Settings::default();
        assert_eq!(settings.effective_timeout(Some(2)), Duration::from_secs(2));
        assert_eq!(
            settings.effective_timeout(Some(300)),
            Duration::from_secs(30)
        );
        assert_eq!(settings.effective_timeout(Some(0)), Duration::from_secs(1));
    }
}
