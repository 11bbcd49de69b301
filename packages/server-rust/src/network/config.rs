//! Settings of the HTTP boundary.

use std::time::Duration;

/// Where the server listens and how it treats each request.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// 0 means OS-assigned.
    pub port: u16,
    /// `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Upper bound on handling one request, including its unit of work.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight requests before giving up.
    pub drain_timeout: Duration,
}

impl NetworkConfig {
    /// `host:port` as passed to the listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
        }
    }
}
