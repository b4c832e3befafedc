//! Configuration sections
//!
//! Plain serde types; loading and layering them is left to the binary.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::machine::{ProvisionerConfig, SecretPolicy};
use crate::registry::{RegistryClient, RegistryEnvironment};
use crate::Result;

/// Full application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reader selection and card timing
    pub reader: ReaderConfig,
    /// Secret generation
    pub secret: SecretConfig,
    /// Registry endpoint and credentials
    pub registry: RegistryConfig,
    /// Lifecycle store location
    pub store: StoreConfig,
}

impl Config {
    /// State machine settings derived from the reader and secret sections
    pub fn provisioner(&self) -> Result<ProvisionerConfig> {
        Ok(ProvisionerConfig::default()
            .with_settle_delay(Duration::from_millis(self.reader.settle_delay_ms))
            .with_secret(self.secret.policy()?))
    }
}

/// `[reader]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Reader to use; the first one found when unset
    pub name: Option<String>,
    /// How long to wait for a card response
    pub response_timeout_ms: u64,
    /// Pause between select and authentication
    pub settle_delay_ms: u64,
    /// Reader poll interval of the monitor
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            name: None,
            response_timeout_ms: 100,
            settle_delay_ms: 150,
            poll_interval_ms: 500,
        }
    }
}

/// `[secret]`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    /// Random key length in bytes, 8 or 16
    pub length: usize,
    /// Use this key for every fob; bench testing only
    pub fixed: Option<String>,
}

impl std::fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretConfig")
            .field("length", &self.length)
            .field("fixed", &self.fixed.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            length: 16,
            fixed: None,
        }
    }
}

impl SecretConfig {
    /// Validated secret policy
    pub fn policy(&self) -> Result<SecretPolicy> {
        match &self.fixed {
            Some(key) => SecretPolicy::fixed(key),
            None => SecretPolicy::random(self.length),
        }
    }
}

/// `[registry]`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Known deployment to talk to
    pub environment: RegistryEnvironment,
    /// Explicit base URL, overriding `environment`
    pub base_url: Option<Url>,
    /// Factory agent user
    pub username: Option<String>,
    /// Factory agent password
    pub password: Option<String>,
    /// Login timeout in seconds
    pub login_timeout_secs: u64,
    /// Upload timeout in seconds
    pub upload_timeout_secs: u64,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| ".."))
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .finish()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            environment: RegistryEnvironment::default(),
            base_url: None,
            username: None,
            password: None,
            login_timeout_secs: 20,
            upload_timeout_secs: 30,
        }
    }
}

impl RegistryConfig {
    /// Base URL requests go to
    pub fn base_url(&self) -> Url {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url())
    }

    /// Client for the configured deployment, not yet logged in
    pub fn client(&self) -> RegistryClient {
        RegistryClient::new(self.base_url()).with_timeouts(
            Duration::from_secs(self.login_timeout_secs),
            Duration::from_secs(self.upload_timeout_secs),
        )
    }
}

/// `[store]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document path
    pub path: Option<PathBuf>,
}
