use std::time::Duration;

/// Default bound on simultaneously registered transactions.
pub const DEFAULT_MAX_TRANSACTIONS: usize = 65_536;

/// Timeouts and limits for a [`Device`](crate::Device).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a sender waits for outgoing buffer space.
    pub send_timeout: Duration,
    /// Response timeout for the protocol version check.
    pub version_timeout: Duration,
    /// Response timeout for a capability query.
    pub capabilities_timeout: Duration,
    /// Response timeout for a network-info query.
    pub network_info_timeout: Duration,
    /// Response timeout for a cancellation.
    pub cancel_timeout: Duration,
    /// Maximum number of live transaction ids.
    pub max_transactions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(15),
            version_timeout: Duration::from_millis(2000),
            capabilities_timeout: Duration::from_millis(2000),
            network_info_timeout: Duration::from_millis(3000),
            cancel_timeout: Duration::from_millis(2000),
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
        }
    }
}

impl EngineConfig {
    /// Use the same response timeout for every request type.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.version_timeout = timeout;
        self.capabilities_timeout = timeout;
        self.network_info_timeout = timeout;
        self.cancel_timeout = timeout;
        self
    }
}
