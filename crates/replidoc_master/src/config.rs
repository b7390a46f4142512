//! Master service configuration.

/// Configuration for the master store service.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Maximum (and default) number of documents per pull response.
    pub max_pull_batch: usize,
    /// Maximum number of change requests per push.
    pub max_push_batch: usize,
}

impl MasterConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            max_push_batch: 100,
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: usize) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self::new()
    }
}
