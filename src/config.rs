//! Engine configuration
//!
//! Defaults with environment variable overrides, constructed once at process
//! start and passed into `Engine::new`.

use std::time::Duration;

/// Tunables for the sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to every remote call (default: 10s). A timed-out
    /// call counts as a failure for optimistic rollback.
    pub remote_timeout_ms: u64,
    /// Page size used by feed refreshes (default: 20)
    pub feed_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 10_000,
            feed_page_size: 20,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("STANZA_REMOTE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.remote_timeout_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("STANZA_FEED_PAGE_SIZE") {
            if let Ok(n) = val.parse::<u32>() {
                config.feed_page_size = n;
            }
        }

        config
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.remote_timeout(), Duration::from_secs(10));
        assert_eq!(config.feed_page_size, 20);
    }
}
