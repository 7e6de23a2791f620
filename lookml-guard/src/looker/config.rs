use std::time::Duration;

use crate::looker::{LookerError, LookerResult};
use crate::security::SecureString;

const DEFAULT_API_VERSION: &str = "4.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Connection settings for a Looker instance.
#[derive(Debug, Clone)]
pub struct LookerConfig {
    base_url: String,
    client_id: String,
    client_secret: SecureString,
    project: String,
    api_version: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl LookerConfig {
    /// Creates settings with the default API version, timeout and poll interval.
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<SecureString>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            project: project.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Reads `LOOKER_BASE_URL`, `LOOKER_CLIENT_ID`, `LOOKER_CLIENT_SECRET`,
    /// `LOOKER_PROJECT` and the optional `LOOKER_API_VERSION` and
    /// `LOOKER_TIMEOUT` (seconds).
    pub fn from_env() -> LookerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> LookerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| LookerError::Configuration {
                    message: format!("{key} is not set"),
                })
        };
        let mut config = Self::new(
            required("LOOKER_BASE_URL")?,
            required("LOOKER_CLIENT_ID")?,
            SecureString::new(required("LOOKER_CLIENT_SECRET")?),
            required("LOOKER_PROJECT")?,
        );
        if let Some(version) = lookup("LOOKER_API_VERSION") {
            config.api_version = version;
        }
        if let Some(timeout) = lookup("LOOKER_TIMEOUT") {
            let secs: u64 = timeout.parse().map_err(|_| LookerError::Configuration {
                message: format!("LOOKER_TIMEOUT must be a number of seconds, got '{timeout}'"),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Sets the API version, e.g. `4.0`.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the timeout of individual HTTP requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how often running query tasks are polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &SecureString {
        &self.client_secret
    }

    /// The LookML project whose models are validated.
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Full URL of an API endpoint.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.base_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }
}
