//! OAuth provider configuration
//!
//! Mirrors the shape of the provider document:
//!
//! ```toml
//! [defaults]
//! origin = "http://localhost:3000"
//! prefix = "/connect"
//!
//! [github]
//! key = "..."
//! secret = "..."
//! scope = ["openid", "user"]
//! callback = "/login"
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const DEFAULT_PREFIX: &str = "/connect";

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_ACCESS_URL: &str = "https://github.com/login/oauth/access_token";

/// Settings shared by every provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDefaults {
    /// Public origin the provider redirects back to
    pub origin: String,
    /// Route prefix the connect routes are mounted under
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// Credentials and endpoints of one OAuth 2.0 provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Client id
    pub key: Option<String>,
    /// Client secret
    pub secret: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    /// Where the flow result is sent; kept in the session when absent
    pub callback: Option<String>,
    pub authorize_url: Option<String>,
    pub access_url: Option<String>,
    /// Extra authorize URL parameters
    #[serde(default)]
    pub custom_params: BTreeMap<String, String>,
    /// Fields a request may override through its query or form body
    #[serde(default)]
    pub dynamic: Vec<String>,
    /// Named static overrides, selected by the second path segment
    #[serde(default)]
    pub overrides: BTreeMap<String, ProviderOverrides>,
}

/// Partial provider settings layered on top of a [`ProviderConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOverrides {
    pub key: Option<String>,
    pub secret: Option<String>,
    pub scope: Option<Vec<String>>,
    pub callback: Option<String>,
    pub custom_params: Option<BTreeMap<String, String>>,
}

/// Per-call runtime overrides, keyed by provider name
pub type GrantOverrides = BTreeMap<String, ProviderOverrides>;

impl ProviderConfig {
    pub fn apply(&mut self, overrides: &ProviderOverrides) {
        if let Some(key) = &overrides.key {
            self.key = Some(key.clone());
        }
        if let Some(secret) = &overrides.secret {
            self.secret = Some(secret.clone());
        }
        if let Some(scope) = &overrides.scope {
            self.scope = scope.clone();
        }
        if let Some(callback) = &overrides.callback {
            self.callback = Some(callback.clone());
        }
        if let Some(custom_params) = &overrides.custom_params {
            self.custom_params
                .extend(custom_params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    /// Authorize endpoint, falling back to the preset for known providers.
    pub fn authorize_endpoint(&self, provider: &str) -> Option<String> {
        self.authorize_url
            .clone()
            .or_else(|| preset(provider).map(|(authorize, _)| authorize.to_string()))
    }

    /// Token endpoint, falling back to the preset for known providers.
    pub fn access_endpoint(&self, provider: &str) -> Option<String> {
        self.access_url
            .clone()
            .or_else(|| preset(provider).map(|(_, access)| access.to_string()))
    }
}

fn preset(provider: &str) -> Option<(&'static str, &'static str)> {
    match provider {
        "github" => Some((GITHUB_AUTHORIZE_URL, GITHUB_ACCESS_URL)),
        _ => None,
    }
}

/// Full provider document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConfig {
    pub defaults: GrantDefaults,
    #[serde(flatten)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl GrantConfig {
    /// Load the provider document from `path` (any format the `config`
    /// crate understands) with `GRANTGATE_OAUTH__*` environment overrides,
    /// e.g. `GRANTGATE_OAUTH__GITHUB__KEY`.
    ///
    /// # Errors
    /// Returns error if the file is missing or does not deserialize
    pub fn load(path: &str) -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("defaults.prefix", DEFAULT_PREFIX)?
            .add_source(File::with_name(path).required(true))
            .add_source(Environment::with_prefix("GRANTGATE_OAUTH").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Placeholder configuration used when no document can be loaded.
    pub fn example() -> Self {
        let github = ProviderConfig {
            key: Some("your app client key goes here".to_string()),
            secret: Some("secret key goes here".to_string()),
            scope: vec!["openid".to_string(), "user".to_string()],
            callback: Some("/login".to_string()),
            ..ProviderConfig::default()
        };

        Self {
            defaults: GrantDefaults {
                origin: "http://localhost:3000".to_string(),
                prefix: default_prefix(),
            },
            providers: BTreeMap::from([("github".to_string(), github)]),
        }
    }

    /// Look up a provider by name, ignoring ASCII case.
    pub fn provider(&self, name: &str) -> Option<(&str, &ProviderConfig)> {
        self.providers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(key, provider)| (key.as_str(), provider))
    }
}

/// Where the connect handler gets its [`GrantConfig`] from
#[derive(Clone)]
pub enum ConfigSource {
    Static(GrantConfig),
    Deferred(Arc<dyn Fn() -> BoxFuture<'static, Result<GrantConfig, AppError>> + Send + Sync>),
}

impl std::fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Static(config) => f.debug_tuple("Static").field(config).finish(),
            ConfigSource::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl ConfigSource {
    pub fn deferred<F, Fut>(resolver: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GrantConfig, AppError>> + Send + 'static,
    {
        ConfigSource::Deferred(Arc::new(move || Box::pin(resolver())))
    }

    /// Read the document at `path` on first use, falling back to
    /// [`GrantConfig::example`] when it cannot be loaded.
    pub fn file_or_example(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::deferred(move || {
            let path = path.clone();
            async move {
                match GrantConfig::load(&path) {
                    Ok(config) => Ok(config),
                    Err(error) => {
                        tracing::warn!(
                            %path,
                            %error,
                            "Failed to load OAuth provider config; using example config"
                        );
                        Ok(GrantConfig::example())
                    }
                }
            }
        })
    }

    pub async fn resolve(&self) -> Result<GrantConfig, AppError> {
        match self {
            ConfigSource::Static(config) => Ok(config.clone()),
            ConfigSource::Deferred(resolver) => resolver().await,
        }
    }
}
