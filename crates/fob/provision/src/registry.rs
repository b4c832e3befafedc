//! Registry client
//!
//! The registry is the backend that pairs each fob number with its key. The
//! engine only depends on the [`Registry`] trait; [`RegistryClient`] is the
//! HTTP implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{Error, Result};

/// Default timeout of the login request
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Default timeout of an upload request
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const PRODUCTION_URL: &str = "https://app2.keyless.rocks";
const OSS_URL: &str = "https://keyless.rentlyopensesame.com";

/// Registry's verdict on one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Whether the pair was accepted
    pub success: bool,
    /// Server or transport message
    #[serde(default)]
    pub message: String,
}

impl UploadOutcome {
    /// An accepted upload
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A refused or failed upload
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Backend that records fob keys
#[async_trait]
pub trait Registry: Send + Sync + fmt::Debug {
    /// Upload the pair; failures of any kind come back as `success = false`
    async fn upload(&self, serial: &str, secret: &str) -> UploadOutcome;
}

/// Known registry deployments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryEnvironment {
    /// Production deployment
    #[default]
    Production,
    /// Open-source deployment
    Oss,
}

impl RegistryEnvironment {
    /// Base URL of the deployment
    pub fn base_url(self) -> Url {
        let raw = match self {
            Self::Production => PRODUCTION_URL,
            Self::Oss => OSS_URL,
        };
        Url::parse(raw).unwrap_or_else(|_| unreachable!("registry URLs are valid"))
    }
}

impl fmt::Display for RegistryEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Oss => f.write_str("oss"),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    grant_type: &'static str,
    factory: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    fob_number: String,
    key: &'a str,
}

/// Error body shapes the registry answers with
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the registry
pub struct RegistryClient {
    base: Url,
    http: Client,
    login_timeout: Duration,
    upload_timeout: Duration,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base", &self.base.as_str())
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Client for the deployment at `base`
    pub fn new(base: Url) -> Self {
        Self::with_http_client(base, Client::new())
    }

    /// Client for a known deployment
    pub fn for_environment(environment: RegistryEnvironment) -> Self {
        Self::new(environment.base_url())
    }

    /// Client reusing an existing HTTP client
    ///
    /// Endpoints are resolved below `base`, so a path prefix such as
    /// `https://host/registry` is kept.
    pub fn with_http_client(mut base: Url, http: Client) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            base,
            http,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            token: RwLock::new(None),
        }
    }

    /// Override request timeouts
    pub const fn with_timeouts(mut self, login: Duration, upload: Duration) -> Self {
        self.login_timeout = login;
        self.upload_timeout = upload;
        self
    }

    /// Base URL requests are sent to
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Whether an access token is held
    pub fn is_logged_in(&self) -> bool {
        self.token.read().is_some()
    }

    /// `path` is relative to the base URL
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("invalid registry URL: {e}")))
    }

    /// Authenticate as a factory agent and keep the access token
    #[instrument(skip(self, password), fields(base = %self.base))]
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("api/agents")?)
            .timeout(self.login_timeout)
            .json(&LoginRequest {
                username,
                password,
                grant_type: "password",
                factory: true,
            })
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if !status.is_success() {
            warn!(%status, "Registry login refused");
            return Err(Error::Network(error_message(status, &body)));
        }

        let login: LoginResponse =
            serde_json::from_str(&body).map_err(|e| Error::Network(e.to_string()))?;
        *self.token.write() = Some(login.access_token);
        info!(username, "Logged in to the registry");
        Ok(())
    }

    async fn try_upload(&self, serial: &str, secret: &str) -> Result<UploadOutcome> {
        let token = self
            .token
            .read()
            .clone()
            .ok_or_else(|| Error::Network("Not logged in to the registry".to_string()))?;

        let response = self
            .http
            .post(self.endpoint("api/fobs/uploadFob")?)
            .timeout(self.upload_timeout)
            .bearer_auth(token)
            .json(&UploadRequest {
                fob_number: serial.to_uppercase(),
                key: secret,
            })
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if let Ok(outcome) = serde_json::from_str::<UploadOutcome>(&body) {
            return Ok(outcome);
        }
        Err(Error::Network(error_message(status, &body)))
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn upload(&self, serial: &str, secret: &str) -> UploadOutcome {
        match self.try_upload(serial, secret).await {
            Ok(outcome) => {
                debug!(serial, success = outcome.success, "Registry answered upload");
                outcome
            }
            Err(Error::Network(message)) => UploadOutcome::failed(message),
            Err(e) => UploadOutcome::failed(e.to_string()),
        }
    }
}

/// Best operator-facing text for a failed request
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error_description).or(b.error))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                format!("{status}: {}", body.trim())
            }
        })
}
