use std::fmt;
use std::time::Duration;

/// How long every wait for a server response may take unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for a [`Client`](crate::client::Client). Fixed once
/// the client is built.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub timeout: Duration,
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            port,
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound every handshake step and every response wait by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// keep the password out of logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
