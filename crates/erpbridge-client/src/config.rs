//! Client configuration
//!
//! Loaded from a TOML file or assembled with [`ClientConfigBuilder`]:
//!
//! ```toml
//! base_url = "https://erp.example.com"
//! timeout_secs = 30
//!
//! [service_accounts.cron]
//! database = "prod"
//! login = "bot@example.com"
//! password = "secret"
//! ```

use crate::cookies::is_valid_cookie_name;
use crate::error::{ClientError, Result};
use crate::identity::{Credentials, ServiceAccount};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_LOGIN_PATH: &str = "/web/session/authenticate";
pub const DEFAULT_RPC_PATH: &str = "/web/dataset/call_kw";
pub const DEFAULT_COOKIE_NAME: &str = "session_id";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

fn default_rpc_path() -> String {
    DEFAULT_RPC_PATH.to_string()
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Backend endpoint and session settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub base_url: Url,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Default deadline for one logical call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Accept a session id from the login body when no cookie is issued
    #[serde(default)]
    pub body_session_fallback: bool,
    #[serde(default)]
    pub service_accounts: HashMap<String, ServiceAccountConfig>,
}

/// Credentials for one named service account
#[derive(Clone, Deserialize)]
pub struct ServiceAccountConfig {
    pub database: String,
    pub login: String,
    pub password: String,
}

impl fmt::Debug for ServiceAccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountConfig")
            .field("database", &self.database)
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// `<config dir>/erpbridge/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("erpbridge").join("config.toml"))
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve a configured service account by name
    pub fn service_account(&self, name: &str) -> Result<ServiceAccount> {
        let account = self
            .service_accounts
            .get(name)
            .ok_or_else(|| ClientError::UnknownServiceAccount(name.to_string()))?;

        let credentials =
            Credentials::new(&account.database, &account.login, &account.password)?;
        Ok(ServiceAccount::new(name, credentials))
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ClientError::config(format!(
                "base_url must be http or https, got {}",
                self.base_url.scheme()
            )));
        }

        for (field, path) in [("login_path", &self.login_path), ("rpc_path", &self.rpc_path)] {
            if !path.starts_with('/') {
                return Err(ClientError::config(format!(
                    "{} must start with '/', got {:?}",
                    field, path
                )));
            }
        }

        if !is_valid_cookie_name(&self.cookie_name) {
            return Err(ClientError::config(format!(
                "Invalid cookie name: {:?}",
                self.cookie_name
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ClientError::config(
                "timeout_secs must be greater than zero",
            ));
        }

        for (name, account) in &self.service_accounts {
            if account.database.trim().is_empty() || account.login.trim().is_empty() {
                return Err(ClientError::config(format!(
                    "Service account {} needs a database and a login",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    login_path: Option<String>,
    rpc_path: Option<String>,
    cookie_name: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    body_session_fallback: bool,
    service_accounts: HashMap<String, ServiceAccountConfig>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn login_path<S: Into<String>>(mut self, path: S) -> Self {
        self.login_path = Some(path.into());
        self
    }

    pub fn rpc_path<S: Into<String>>(mut self, path: S) -> Self {
        self.rpc_path = Some(path.into());
        self
    }

    pub fn cookie_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn body_session_fallback(mut self, enabled: bool) -> Self {
        self.body_session_fallback = enabled;
        self
    }

    pub fn service_account<S: Into<String>>(
        mut self,
        name: S,
        database: S,
        login: S,
        password: S,
    ) -> Self {
        self.service_accounts.insert(
            name.into(),
            ServiceAccountConfig {
                database: database.into(),
                login: login.into(),
                password: password.into(),
            },
        );
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Validation("Base URL is required".to_string()))?;

        let base_url = Url::parse(base_url.trim())
            .map_err(|e| ClientError::Validation(format!("Invalid base URL: {}", e)))?;

        let timeout = self
            .timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        if timeout.as_secs() == 0 {
            return Err(ClientError::Validation(
                "Timeout must be at least one second".to_string(),
            ));
        }

        let config = ClientConfig {
            base_url,
            login_path: self.login_path.unwrap_or_else(default_login_path),
            rpc_path: self.rpc_path.unwrap_or_else(default_rpc_path),
            cookie_name: self.cookie_name.unwrap_or_else(default_cookie_name),
            timeout_secs: timeout.as_secs(),
            user_agent: self.user_agent.unwrap_or_else(default_user_agent),
            body_session_fallback: self.body_session_fallback,
            service_accounts: self.service_accounts,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"https://erp.example.com\"").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();

        assert_eq!(config.base_url.as_str(), "https://erp.example.com/");
        assert_eq!(config.login_path, DEFAULT_LOGIN_PATH);
        assert_eq!(config.rpc_path, DEFAULT_RPC_PATH);
        assert_eq!(config.cookie_name, "session_id");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(!config.body_session_fallback);
        assert!(config.service_accounts.is_empty());
    }

    #[test]
    fn test_service_accounts_are_loaded() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://erp.example.com"
            timeout_secs = 5

            [service_accounts.cron]
            database = "prod"
            login = "bot@example.com"
            password = "hunter2"
            "#,
        )
        .unwrap();

        let account = config.service_account("cron").unwrap();
        assert_eq!(account.name(), "cron");
        assert_eq!(account.credentials().database(), "prod");
        assert_eq!(account.credentials().password().expose_secret(), "hunter2");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_service_account() {
        let config = ClientConfig::builder()
            .base_url("https://erp.example.com")
            .build()
            .unwrap();

        match config.service_account("nightly") {
            Err(ClientError::UnknownServiceAccount(name)) => assert_eq!(name, "nightly"),
            other => panic!("Expected UnknownServiceAccount, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClientConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = ClientConfig::from_toml_str("base_url = ");
        assert!(matches!(result, Err(ClientError::Toml(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad_path = ClientConfig::from_toml_str(
            "base_url = \"https://erp.example.com\"\nrpc_path = \"web/dataset\"",
        );
        assert!(matches!(bad_path, Err(ClientError::Config(_))));

        let bad_scheme = ClientConfig::from_toml_str("base_url = \"ftp://erp.example.com\"");
        assert!(matches!(bad_scheme, Err(ClientError::Config(_))));

        let zero_timeout = ClientConfig::from_toml_str(
            "base_url = \"https://erp.example.com\"\ntimeout_secs = 0",
        );
        assert!(matches!(zero_timeout, Err(ClientError::Config(_))));

        let bad_cookie = ClientConfig::builder()
            .base_url("https://erp.example.com")
            .cookie_name("session id")
            .build();
        assert!(matches!(bad_cookie, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_builder_requires_valid_base_url() {
        let missing = ClientConfigBuilder::new().build();
        assert!(matches!(missing, Err(ClientError::Validation(_))));

        let garbage = ClientConfig::builder().base_url("not a url").build();
        assert!(matches!(garbage, Err(ClientError::Validation(_))));

        let zero = ClientConfig::builder()
            .base_url("https://erp.example.com")
            .timeout(Duration::from_millis(100))
            .build();
        assert!(matches!(zero, Err(ClientError::Validation(_))));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::builder()
            .base_url("http://localhost:8069")
            .cookie_name("sid")
            .timeout(Duration::from_secs(10))
            .body_session_fallback(true)
            .service_account("cron", "prod", "bot", "pw")
            .build()
            .unwrap();

        assert_eq!(config.cookie_name, "sid");
        assert_eq!(config.timeout_secs, 10);
        assert!(config.body_session_fallback);
        assert!(config.service_accounts.contains_key("cron"));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ClientConfig::builder()
            .base_url("https://erp.example.com")
            .service_account("cron", "prod", "bot", "hunter2")
            .build()
            .unwrap();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
