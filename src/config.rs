//! Client configuration for on-device decisioning
//!
//! One `ClientConfig` per client code. Loaded from TOML or built in code;
//! every field except `client` has a default.

use crate::error::{DecisioningError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Minimum effective artifact polling interval (5 minutes)
pub const MIN_POLLING_INTERVAL_SECS: u64 = 300;

const DEFAULT_ARTIFACT_HOSTNAME: &str = "assets.adobetarget.com";
const DEFAULT_GEO_HOSTNAME: &str = "mboxedge.tt.omtrdc.net";
const DEFAULT_ENVIRONMENT: &str = "production";

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client code, used in the artifact URL and allocation seed
    pub client: String,

    /// Organization id (informational, forwarded to the transport)
    pub organization_id: Option<String>,

    /// Artifact environment name (e.g. "production", "staging")
    pub environment: String,

    /// Numeric environment id reported in traces
    pub environment_id: Option<i64>,

    /// Host serving rule artifacts
    pub artifact_hostname: String,

    /// Host answering IP geo lookups
    pub geo_hostname: String,

    /// Requested artifact polling interval in seconds
    pub polling_interval_secs: u64,

    /// Preloaded artifact JSON published on start, before the first poll
    pub artifact_payload: Option<String>,

    /// Mboxes for which every matching rule is returned instead of the first
    pub all_matching_rules_mboxes: Vec<String>,

    /// Notification worker pool sizing
    pub notification_pool: NotificationPoolConfig,

    /// Timeout for artifact and geo HTTP calls, in seconds
    pub request_timeout_secs: u64,

    /// Log every assembled on-device response at debug level
    pub log_requests: bool,
}

/// Sizing for the notification delivery worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPoolConfig {
    /// Workers that live for the lifetime of the service
    pub core_workers: usize,

    /// Upper bound on workers, including overflow workers
    pub max_workers: usize,

    /// Pending notification capacity before rejection
    pub queue_capacity: usize,

    /// How long an overflow worker waits for more work before exiting
    pub keep_alive_secs: u64,

    /// How long `stop` waits for in-flight deliveries
    pub shutdown_timeout_secs: u64,
}

impl Default for NotificationPoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 2,
            max_workers: 50,
            queue_capacity: 500,
            keep_alive_secs: 60,
            shutdown_timeout_secs: 2,
        }
    }
}

impl NotificationPoolConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client: String::new(),
            organization_id: None,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            environment_id: None,
            artifact_hostname: DEFAULT_ARTIFACT_HOSTNAME.to_string(),
            geo_hostname: DEFAULT_GEO_HOSTNAME.to_string(),
            polling_interval_secs: MIN_POLLING_INTERVAL_SECS,
            artifact_payload: None,
            all_matching_rules_mboxes: Vec::new(),
            notification_pool: NotificationPoolConfig::default(),
            request_timeout_secs: 10,
            log_requests: false,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a client code with all defaults
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading client config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.client.trim().is_empty() {
            return Err(DecisioningError::Config("client cannot be empty".to_string()));
        }
        if self.environment.trim().is_empty() {
            return Err(DecisioningError::Config(
                "environment cannot be empty".to_string(),
            ));
        }
        let pool = &self.notification_pool;
        if pool.core_workers == 0 {
            return Err(DecisioningError::Config(
                "notification_pool.core_workers must be at least 1".to_string(),
            ));
        }
        if pool.max_workers < pool.core_workers {
            return Err(DecisioningError::Config(format!(
                "notification_pool.max_workers ({}) is below core_workers ({})",
                pool.max_workers, pool.core_workers
            )));
        }
        if pool.queue_capacity == 0 {
            return Err(DecisioningError::Config(
                "notification_pool.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective polling interval; never shorter than five minutes
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs.max(MIN_POLLING_INTERVAL_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// True when every matching rule should be returned for this mbox
    pub fn evaluates_all_rules(&self, mbox: &str) -> bool {
        self.all_matching_rules_mboxes.iter().any(|m| m == mbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("acme");
        assert_eq!(config.environment, "production");
        assert_eq!(config.notification_pool.core_workers, 2);
        assert_eq!(config.notification_pool.max_workers, 50);
        assert_eq!(config.notification_pool.queue_capacity, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_polling_interval_floor() {
        let mut config = ClientConfig::new("acme");
        config.polling_interval_secs = 10;
        assert_eq!(config.polling_interval(), Duration::from_secs(300));

        config.polling_interval_secs = 900;
        assert_eq!(config.polling_interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_validation_errors() {
        assert!(ClientConfig::default().validate().is_err());

        let mut config = ClientConfig::new("acme");
        config.notification_pool.max_workers = 1;
        config.notification_pool.core_workers = 2;
        assert!(matches!(config.validate(), Err(DecisioningError::Config(_))));

        let mut config = ClientConfig::new("acme");
        config.notification_pool.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_str_partial() {
        let config = ClientConfig::from_toml_str(
            r#"
            client = "acme"
            environment = "Staging"
            all_matching_rules_mboxes = ["hero", "footer"]

            [notification_pool]
            queue_capacity = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.environment, "Staging");
        assert!(config.evaluates_all_rules("hero"));
        assert!(!config.evaluates_all_rules("sidebar"));
        assert_eq!(config.notification_pool.queue_capacity, 10);
        assert_eq!(config.notification_pool.core_workers, 2);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client = \"fromfile\"\npolling_interval_secs = 600").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.client, "fromfile");
        assert_eq!(config.polling_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_from_file_missing_client() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "environment = \"production\"").unwrap();

        let result = ClientConfig::from_file(file.path());
        assert!(matches!(result, Err(DecisioningError::Config(_))));
    }
}
