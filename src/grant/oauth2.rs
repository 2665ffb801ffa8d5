//! OAuth 2.0 authorization code engine
//!
//! # Steps
//! 1. `<prefix>/<provider>[/<override>]` stores a random `state` in the
//!    `grant` session entry and redirects to the provider's authorize URL
//! 2. `<prefix>/<provider>/callback` checks `state`, exchanges `code` for an
//!    access token and sends the result to the provider's `callback`
//!
//! Failures the provider reports, and flow errors such as a state mismatch,
//! are delivered to the callback as an `error` query parameter. Transport
//! failures while exchanging the code propagate as errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::async_trait;
use axum::http::Method;
use base64::Engine;
use rand::RngCore;
use serde_json::{Map, Value, json};
use url::Url;

use super::config::{GrantConfig, ProviderConfig};
use super::engine::{EngineFactory, GrantEngine, GrantRequest, GrantResponse};
use super::request::parse_query;
use crate::error::AppError;
use crate::session::SessionData;

const SESSION_KEY: &str = "grant";
const CALLBACK_OVERRIDE: &str = "callback";

const MISCONFIGURED_PROVIDER: &str = "Grant: missing or misconfigured provider";
const STATE_MISMATCH: &str = "Grant: OAuth2 missing or mismatching state parameter";
const MISSING_CODE: &str = "Grant: OAuth2 missing code parameter";
const MISSING_ACCESS_TOKEN: &str = "Grant: OAuth2 missing access_token";

/// Engine factory building an [`OAuth2Engine`] around a shared client.
pub fn oauth2_engine_factory(http: reqwest::Client) -> EngineFactory {
    Arc::new(move |config: Arc<GrantConfig>| -> Arc<dyn GrantEngine> {
        Arc::new(OAuth2Engine::new(config, http.clone()))
    })
}

/// Provider settings after every override layer has been applied
#[derive(Debug, Clone)]
struct ResolvedProvider {
    name: String,
    key: String,
    secret: String,
    scope: Vec<String>,
    callback: Option<String>,
    authorize_url: String,
    access_url: String,
    custom_params: BTreeMap<String, String>,
}

pub struct OAuth2Engine {
    config: Arc<GrantConfig>,
    http: reqwest::Client,
}

impl OAuth2Engine {
    pub fn new(config: Arc<GrantConfig>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn redirect_uri(&self, provider: &str) -> String {
        format!(
            "{}{}/{}/{}",
            self.config.defaults.origin.trim_end_matches('/'),
            self.config.defaults.prefix,
            provider,
            CALLBACK_OVERRIDE
        )
    }

    /// Layer static config, named override, dynamic fields and runtime
    /// overrides, in that order.
    fn resolve(
        &self,
        request: &GrantRequest,
        named_override: Option<&str>,
        dynamic: &Map<String, Value>,
    ) -> Option<ResolvedProvider> {
        let (name, base) = self.config.provider(&request.params.provider)?;
        let mut provider: ProviderConfig = base.clone();

        if let Some(overrides) = named_override.and_then(|key| base.overrides.get(key)) {
            provider.apply(overrides);
        }

        for (field, value) in dynamic {
            let Some(value) = value.as_str() else {
                continue;
            };
            match field.as_str() {
                "scope" => {
                    provider.scope = value
                        .split([' ', ','])
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "callback" => provider.callback = Some(value.to_string()),
                _ => {
                    provider
                        .custom_params
                        .insert(field.clone(), value.to_string());
                }
            }
        }

        if let Some(overrides) = request.state.as_ref().and_then(|state| state.get(name)) {
            provider.apply(overrides);
        }

        Some(ResolvedProvider {
            name: name.to_string(),
            authorize_url: provider.authorize_endpoint(name)?,
            access_url: provider.access_endpoint(name)?,
            key: provider.key.filter(|key| !key.is_empty())?,
            secret: provider.secret.unwrap_or_default(),
            scope: provider.scope,
            callback: provider.callback,
            custom_params: provider.custom_params,
        })
    }

    /// Fields of the query (GET) or form body (POST) the provider allows to
    /// be overridden per request.
    fn dynamic_fields(&self, request: &GrantRequest) -> Map<String, Value> {
        let Some((_, provider)) = self.config.provider(&request.params.provider) else {
            return Map::new();
        };
        if provider.dynamic.is_empty() {
            return Map::new();
        }

        let source = if request.method == Method::POST {
            parse_query(&String::from_utf8_lossy(&request.body))
        } else {
            request.query.clone()
        };

        source
            .into_iter()
            .filter(|(field, _)| provider.dynamic.iter().any(|allowed| allowed == field))
            .collect()
    }

    fn connect(&self, request: GrantRequest) -> Result<GrantResponse, AppError> {
        let named_override = request.params.r#override.clone();
        let dynamic = self.dynamic_fields(&request);
        let mut session = request.session.clone();

        let Some(provider) = self.resolve(&request, named_override.as_deref(), &dynamic) else {
            return Ok(error_response(None, session, &[("error", MISCONFIGURED_PROVIDER)]));
        };

        let state = generate_state();
        let mut url = Url::parse(&provider.authorize_url).map_err(|e| {
            AppError::Config(format!(
                "invalid authorize URL for {}: {}",
                provider.name, e
            ))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &provider.key)
                .append_pair("redirect_uri", &self.redirect_uri(&provider.name))
                .append_pair("response_type", "code");
            if !provider.scope.is_empty() {
                pairs.append_pair("scope", &provider.scope.join(" "));
            }
            pairs.append_pair("state", &state);
            for (name, value) in &provider.custom_params {
                pairs.append_pair(name, value);
            }
        }

        let mut grant = json!({
            "provider": provider.name,
            "state": state,
        });
        if let Some(name) = named_override {
            grant["override"] = Value::String(name);
        }
        if !dynamic.is_empty() {
            grant["dynamic"] = Value::Object(dynamic);
        }
        session.insert(SESSION_KEY.to_string(), grant);

        Ok(GrantResponse {
            location: Some(url.to_string()),
            session,
        })
    }

    async fn callback(&self, request: GrantRequest) -> Result<GrantResponse, AppError> {
        let mut session = request.session.clone();
        let grant = session
            .remove(SESSION_KEY)
            .and_then(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();

        let named_override = grant.get("override").and_then(Value::as_str);
        let dynamic = grant
            .get("dynamic")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let Some(provider) = self.resolve(&request, named_override, &dynamic) else {
            return Ok(error_response(None, session, &[("error", MISCONFIGURED_PROVIDER)]));
        };
        let callback = provider.callback.as_deref();

        if let Some(error) = query_str(&request.query, "error") {
            let mut pairs = vec![("error", error)];
            for field in ["error_description", "error_uri"] {
                if let Some(value) = query_str(&request.query, field) {
                    pairs.push((field, value));
                }
            }
            return Ok(error_response(callback, session, &pairs));
        }

        // State is bound to the provider the flow started with.
        let started_with = grant.get("provider").and_then(Value::as_str);
        let expected_state = grant.get("state").and_then(Value::as_str);
        let received_state = query_str(&request.query, "state");
        if started_with != Some(provider.name.as_str())
            || expected_state.is_none()
            || expected_state != received_state
        {
            return Ok(error_response(callback, session, &[("error", STATE_MISMATCH)]));
        }

        let Some(code) = query_str(&request.query, "code") else {
            return Ok(error_response(callback, session, &[("error", MISSING_CODE)]));
        };

        let redirect_uri = self.redirect_uri(&provider.name);
        let body: Value = self
            .http
            .post(&provider.access_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", provider.key.as_str()),
                ("client_secret", provider.secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            let mut pairs = vec![("error", error)];
            for field in ["error_description", "error_uri"] {
                if let Some(value) = body.get(field).and_then(Value::as_str) {
                    pairs.push((field, value));
                }
            }
            return Ok(error_response(callback, session, &pairs));
        }

        let Some(access_token) = body.get("access_token").and_then(Value::as_str) else {
            return Ok(error_response(callback, session, &[("error", MISSING_ACCESS_TOKEN)]));
        };
        let refresh_token = body.get("refresh_token").and_then(Value::as_str);

        tracing::info!(provider = %provider.name, "OAuth code exchanged for access token");

        match callback {
            Some(callback) => {
                let mut pairs = vec![("access_token", access_token)];
                if let Some(refresh_token) = refresh_token {
                    pairs.push(("refresh_token", refresh_token));
                }
                Ok(GrantResponse {
                    location: Some(append_query(callback, &pairs)),
                    session,
                })
            }
            None => {
                session.insert(
                    SESSION_KEY.to_string(),
                    json!({
                        "provider": provider.name,
                        "response": {
                            "access_token": access_token,
                            "refresh_token": refresh_token,
                            "raw": body.clone(),
                        },
                    }),
                );
                Ok(GrantResponse {
                    location: None,
                    session,
                })
            }
        }
    }
}

#[async_trait]
impl GrantEngine for OAuth2Engine {
    fn config(&self) -> &GrantConfig {
        &self.config
    }

    async fn handle(&self, request: GrantRequest) -> Result<GrantResponse, AppError> {
        if request.params.r#override.as_deref() == Some(CALLBACK_OVERRIDE) {
            self.callback(request).await
        } else {
            self.connect(request)
        }
    }
}

fn query_str<'a>(query: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    query.get(key).and_then(Value::as_str)
}

/// Send the error to `callback`, or keep it in the session when there is
/// nowhere to send it.
fn error_response(
    callback: Option<&str>,
    mut session: SessionData,
    pairs: &[(&str, &str)],
) -> GrantResponse {
    tracing::warn!(error = ?pairs, "OAuth flow failed");

    match callback {
        Some(callback) => {
            session.remove(SESSION_KEY);
            GrantResponse {
                location: Some(append_query(callback, pairs)),
                session,
            }
        }
        None => {
            let response: Map<String, Value> = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect();
            let mut grant = match session.remove(SESSION_KEY) {
                Some(Value::Object(grant)) => grant,
                _ => Map::new(),
            };
            grant.insert("response".to_string(), Value::Object(response));
            session.insert(SESSION_KEY.to_string(), Value::Object(grant));
            GrantResponse {
                location: None,
                session,
            }
        }
    }
}

/// Append form-encoded pairs to an absolute or relative URL.
fn append_query(base: &str, pairs: &[(&str, &str)]) -> String {
    if let Ok(mut url) = Url::parse(base) {
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
        }
        return url.to_string();
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, serializer.finish())
}

fn generate_state() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::config::ProviderOverrides;
    use crate::grant::engine::GrantParams;
    use axum::body::Bytes;

    fn engine() -> OAuth2Engine {
        let mut config = GrantConfig::example();
        let github = config.providers.get_mut("github").unwrap();
        github.key = Some("client-id".to_string());
        github.dynamic = vec!["scope".to_string()];
        github.overrides.insert(
            "admin".to_string(),
            ProviderOverrides {
                scope: Some(vec!["admin:org".to_string()]),
                ..ProviderOverrides::default()
            },
        );
        OAuth2Engine::new(Arc::new(config), reqwest::Client::new())
    }

    fn request(provider: &str, r#override: Option<&str>, query: &str) -> GrantRequest {
        GrantRequest {
            method: Method::GET,
            params: GrantParams {
                provider: provider.to_string(),
                r#override: r#override.map(str::to_string),
            },
            query: parse_query(query),
            body: Bytes::new(),
            session: SessionData::new(),
            state: None,
        }
    }

    fn location_query(location: &str) -> Map<String, Value> {
        let (_, query) = location.split_once('?').unwrap();
        parse_query(query)
    }

    #[tokio::test]
    async fn connect_redirects_to_authorize_url_and_stores_state() {
        let response = engine()
            .handle(request("github", None, ""))
            .await
            .unwrap();

        let location = response.location.unwrap();
        assert!(location.starts_with("https://github.com/login/oauth/authorize?"));
        let query = location_query(&location);
        assert_eq!(query["client_id"], "client-id");
        assert_eq!(
            query["redirect_uri"],
            "http://localhost:3000/connect/github/callback"
        );
        assert_eq!(query["scope"], "openid user");

        let grant = &response.session["grant"];
        assert_eq!(grant["provider"], "github");
        assert_eq!(grant["state"], query["state"]);
    }

    #[tokio::test]
    async fn named_override_and_dynamic_scope_apply() {
        let response = engine()
            .handle(request("github", Some("admin"), ""))
            .await
            .unwrap();
        let query = location_query(response.location.as_deref().unwrap());
        assert_eq!(query["scope"], "admin:org");
        assert_eq!(response.session["grant"]["override"], "admin");

        let response = engine()
            .handle(request("github", None, "scope=repo,gist&ignored=1"))
            .await
            .unwrap();
        let query = location_query(response.location.as_deref().unwrap());
        assert_eq!(query["scope"], "repo gist");
        assert!(query.get("ignored").is_none());
        assert_eq!(response.session["grant"]["dynamic"]["scope"], "repo,gist");
    }

    #[tokio::test]
    async fn runtime_overrides_win() {
        let mut request = request("github", None, "");
        request.state = Some(BTreeMap::from([(
            "github".to_string(),
            ProviderOverrides {
                key: Some("runtime-id".to_string()),
                ..ProviderOverrides::default()
            },
        )]));

        let response = engine().handle(request).await.unwrap();
        let query = location_query(response.location.as_deref().unwrap());
        assert_eq!(query["client_id"], "runtime-id");
    }

    #[tokio::test]
    async fn unknown_provider_keeps_error_in_session() {
        let response = engine()
            .handle(request("gitlab", None, ""))
            .await
            .unwrap();

        assert!(response.location.is_none());
        assert_eq!(
            response.session["grant"]["response"]["error"],
            MISCONFIGURED_PROVIDER
        );
    }

    #[tokio::test]
    async fn callback_with_provider_error_redirects_with_error() {
        let response = engine()
            .handle(request(
                "github",
                Some("callback"),
                "error=access_denied&error_description=denied",
            ))
            .await
            .unwrap();

        let location = response.location.unwrap();
        assert!(location.starts_with("/login?"));
        let query = location_query(&location);
        assert_eq!(query["error"], "access_denied");
        assert_eq!(query["error_description"], "denied");
        assert!(response.session.is_empty());
    }

    #[tokio::test]
    async fn callback_rejects_state_mismatch() {
        let mut request = request("github", Some("callback"), "code=abc&state=wrong");
        request
            .session
            .insert("grant".to_string(), json!({ "provider": "github", "state": "right" }));

        let response = engine().handle(request).await.unwrap();
        let query = location_query(response.location.as_deref().unwrap());
        assert_eq!(query["error"], STATE_MISMATCH);
        assert!(!response.session.contains_key("grant"));
    }

    #[tokio::test]
    async fn callback_rejects_state_issued_for_another_provider() {
        let mut config = GrantConfig::example();
        for name in ["github", "gitea"] {
            let provider = config.providers.entry(name.to_string()).or_default();
            provider.key = Some("client-id".to_string());
            provider.authorize_url = Some(format!("https://{name}.example.com/authorize"));
            provider.access_url = Some(format!("https://{name}.example.com/token"));
            provider.callback = Some("/login".to_string());
        }
        let engine = OAuth2Engine::new(Arc::new(config), reqwest::Client::new());

        let mut request = request("gitea", Some("callback"), "code=abc&state=right");
        request
            .session
            .insert("grant".to_string(), json!({ "provider": "github", "state": "right" }));

        let response = engine.handle(request).await.unwrap();
        let query = location_query(response.location.as_deref().unwrap());
        assert_eq!(query["error"], STATE_MISMATCH);
        assert!(!response.session.contains_key("grant"));
    }

    #[tokio::test]
    async fn callback_without_code_reports_missing_code() {
        let mut request = request("github", Some("callback"), "state=right");
        request
            .session
            .insert("grant".to_string(), json!({ "provider": "github", "state": "right" }));

        let response = engine().handle(request).await.unwrap();
        let query = location_query(response.location.as_deref().unwrap());
        assert_eq!(query["error"], MISSING_CODE);
    }

    #[test]
    fn append_query_handles_relative_and_absolute() {
        assert_eq!(
            append_query("/login", &[("access_token", "xyz")]),
            "/login?access_token=xyz"
        );
        assert_eq!(
            append_query("/login?next=%2F", &[("error", "a b")]),
            "/login?next=%2F&error=a+b"
        );
        assert_eq!(
            append_query("https://app.example.com/done", &[("access_token", "xyz")]),
            "https://app.example.com/done?access_token=xyz"
        );
    }
}
