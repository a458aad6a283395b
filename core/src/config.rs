//! Client configuration with environment overrides.

use std::time::Duration;

use crate::client::{ThreeScaleClient, DEFAULT_HOST};
use crate::error::ClientError;
use crate::transport::{UreqTransport, DEFAULT_TIMEOUT};

pub const ENV_BACKEND_URL: &str = "THREESCALE_BACKEND_URL";
pub const ENV_TIMEOUT_SECS: &str = "THREESCALE_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://{DEFAULT_HOST}"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by `THREESCALE_BACKEND_URL` and
    /// `THREESCALE_TIMEOUT_SECS` when set.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = url.trim().to_string();
        }

        if let Some(secs) = lookup(ENV_TIMEOUT_SECS).filter(|v| !v.trim().is_empty()) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ClientError::InvalidArgument(format!("{ENV_TIMEOUT_SECS} must be a whole number, got {secs:?}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn build(&self) -> ThreeScaleClient<UreqTransport> {
        ThreeScaleClient::with_transport(&self.base_url, UreqTransport::with_timeout(self.timeout))
    }
}
