//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every store a manager opens.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Idle time added to the last operation's duration before sync resumes.
    pub resume_grace: Duration,
    /// Assumed duration of the previous operation before any was measured.
    pub initial_operation_estimate: Duration,
    /// Name of the offline store used when nobody is logged in.
    pub local_default_name: String,
    /// Buffer size of the application-facing change event channel.
    pub event_capacity: usize,
    /// Where to persist local markers; kept in memory only when `None`.
    pub markers_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            resume_grace: Duration::from_millis(1000),
            initial_operation_estimate: Duration::from_millis(1000),
            local_default_name: "local-default".to_string(),
            event_capacity: 100,
            markers_path: None,
        }
    }
}

/// Builder for store configuration.
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn resume_grace(mut self, grace: Duration) -> Self {
        self.config.resume_grace = grace;
        self
    }

    pub fn initial_operation_estimate(mut self, estimate: Duration) -> Self {
        self.config.initial_operation_estimate = estimate;
        self
    }

    pub fn local_default_name(mut self, name: impl Into<String>) -> Self {
        self.config.local_default_name = name.into();
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn markers_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.markers_path = Some(path.into());
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfigBuilder::new()
            .resume_grace(Duration::from_millis(250))
            .initial_operation_estimate(Duration::from_millis(10))
            .local_default_name("offline")
            .event_capacity(0)
            .markers_path("/tmp/markers.json")
            .build();

        assert_eq!(config.resume_grace, Duration::from_millis(250));
        assert_eq!(config.initial_operation_estimate, Duration::from_millis(10));
        assert_eq!(config.local_default_name, "offline");
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.markers_path, Some(PathBuf::from("/tmp/markers.json")));
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.resume_grace, Duration::from_secs(1));
        assert!(config.markers_path.is_none());
    }
}
