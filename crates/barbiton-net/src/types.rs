use std::time::Duration;

/// Options for [`PacketRouter`](crate::PacketRouter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetOptions {
    /// Upper bound on a single chunk or key exchange.
    pub request_timeout: Duration,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl NetOptions {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
