//! Store configuration.

/// Configuration for a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Deliver coalesced notifications at the end of every public mutating
    /// call instead of waiting for an explicit `flush()`.
    pub auto_flush: bool,

    /// Maximum number of events kept for polling.
    pub max_event_history: usize,

    /// Use the collaborator's batch hooks when it supports them.
    pub bulk_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            max_event_history: 10_000,
            bulk_commit: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether notifications are flushed after every mutation.
    #[must_use]
    pub const fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    /// Sets the event history bound.
    #[must_use]
    pub const fn max_event_history(mut self, size: usize) -> Self {
        self.max_event_history = size;
        self
    }

    /// Sets whether batch commit hooks are used.
    #[must_use]
    pub const fn bulk_commit(mut self, value: bool) -> Self {
        self.bulk_commit = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(!config.auto_flush);
        assert!(config.bulk_commit);
        assert_eq!(config.max_event_history, 10_000);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .auto_flush(true)
            .bulk_commit(false)
            .max_event_history(16);

        assert!(config.auto_flush);
        assert!(!config.bulk_commit);
        assert_eq!(config.max_event_history, 16);
    }
}
