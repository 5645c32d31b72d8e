use tracing::warn;

/// Environment variable overriding [`RefreshConfig::max_retries`].
pub const MAX_RETRIES_ENV: &str = "CATALOG_REFRESH_MAX_RETRIES";

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for refresh execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Extra attempts after a conflicting first attempt. Only applies when the refresh
    /// owns its unit of work.
    pub max_retries: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RefreshConfig {
    /// Defaults, overridden by `CATALOG_REFRESH_MAX_RETRIES` when it holds a valid count.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(MAX_RETRIES_ENV).ok().as_deref())
    }

    fn from_env_value(raw: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = raw {
            match raw.trim().parse::<u32>() {
                Ok(max_retries) => config.max_retries = max_retries,
                Err(_) => warn!(
                    value = raw,
                    default = DEFAULT_MAX_RETRIES,
                    "ignoring invalid {MAX_RETRIES_ENV}"
                ),
            }
        }
        config
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_three_retries() {
        let config = RefreshConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
    }

    #[test]
    fn env_value_overrides_default() {
        assert_eq!(RefreshConfig::from_env_value(Some("7")).max_retries, 7);
        assert_eq!(RefreshConfig::from_env_value(Some(" 0 ")).max_retries, 0);
    }

    #[test]
    fn invalid_env_value_keeps_default() {
        assert_eq!(
            RefreshConfig::from_env_value(Some("many")).max_retries,
            DEFAULT_MAX_RETRIES
        );
        assert_eq!(RefreshConfig::from_env_value(None), RefreshConfig::default());
    }
}
