//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Once;

use axum::{
    Form, Json, Router,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use grantgate::grant::{ConfigSource, GrantConfig, GrantDefaults, ProviderConfig};
use grantgate::{AppState, config};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Code the mock GitHub exchanges for [`GITHUB_TOKEN`]
pub const GOOD_CODE: &str = "good-code";
/// Access token the mock GitHub accepts
pub const GITHUB_TOKEN: &str = "gho_test_token";
pub const GITHUB_LOGIN: &str = "octocat";
pub const GITHUB_AVATAR: &str = "https://avatars.example.com/u/583231";

static METRICS: Once = Once::new();

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub github_addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    /// Client that does not follow redirects
    pub client: reqwest::Client,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TestOptions {
    pub intercept_errors: bool,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        // Registry is process-wide; register once per test binary
        METRICS.call_once(grantgate::metrics::init_metrics);

        let github_addr = spawn_mock_github().await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Bind first so the public origin is known
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                domain: format!("localhost:{}", addr.port()),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            session: config::SessionConfig {
                name: "app_session".to_string(),
                secret: "test-user-session-secret-32-bytes!!".to_string(),
                max_age: 2_592_000,
            },
            oauth: config::OAuthConfig {
                config_path: "config/oauth".to_string(),
                mount_prefix: "/connect".to_string(),
                session_name: None,
                session_secret: Some("test-oauth-session-secret-32-bytes!".to_string()),
                debug: true,
                intercept_errors: options.intercept_errors,
                github_api_url: github_addr.clone(),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let grant_config = GrantConfig {
            defaults: GrantDefaults {
                origin: addr_str.clone(),
                prefix: "/connect".to_string(),
            },
            providers: BTreeMap::from([(
                "github".to_string(),
                ProviderConfig {
                    key: Some("test-client-id".to_string()),
                    secret: Some("test-client-secret".to_string()),
                    scope: vec!["read:user".to_string()],
                    callback: Some("/login".to_string()),
                    authorize_url: Some(format!("{github_addr}/login/oauth/authorize")),
                    access_url: Some(format!("{github_addr}/login/oauth/access_token")),
                    ..ProviderConfig::default()
                },
            )]),
        };

        // Initialize app state
        let state = AppState::with_grant_source(config, ConfigSource::Static(grant_config))
            .await
            .unwrap();

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let app = grantgate::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            github_addr,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// GET with an optional `Cookie` header
    pub async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .unwrap()
    }

    /// Register a password user and return the `name=value` session cookie.
    pub async fn register(&self, username: &str, password: &str) -> String {
        let response = self
            .post_form(
                "/login",
                &[
                    ("loginType", "register"),
                    ("username", username),
                    ("password", password),
                    ("redirectTo", "/"),
                ],
            )
            .await;
        assert!(response.status().is_redirection());
        cookie_pair(&response, "app_session").expect("user session cookie")
    }
}

/// `name=value` of the named `Set-Cookie` header, if present.
pub fn cookie_pair(response: &reqwest::Response, name: &str) -> Option<String> {
    set_cookie(response, name).map(|value| value.split(';').next().unwrap().to_string())
}

/// Full named `Set-Cookie` header value, if present.
pub fn set_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .unwrap()
        .to_string()
}

/// Query parameters of an absolute or relative URL.
pub fn query_params(location: &str) -> HashMap<String, String> {
    let url = url::Url::parse(location)
        .or_else(|_| url::Url::parse("http://relative.invalid").unwrap().join(location))
        .unwrap();
    url.query_pairs().into_owned().collect()
}

// =============================================================================
// Mock GitHub
// =============================================================================

async fn spawn_mock_github() -> String {
    let app = Router::new()
        .route("/login/oauth/access_token", post(mock_access_token))
        .route("/user", get(mock_user));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn mock_access_token(Form(form): Form<HashMap<String, String>>) -> Json<serde_json::Value> {
    let valid_client = form.get("client_id").map(String::as_str) == Some("test-client-id")
        && form.get("client_secret").map(String::as_str) == Some("test-client-secret");

    if valid_client && form.get("code").map(String::as_str) == Some(GOOD_CODE) {
        Json(json!({
            "access_token": GITHUB_TOKEN,
            "token_type": "bearer",
            "scope": "read:user",
        }))
    } else {
        Json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired.",
            "error_uri": "https://docs.github.com/apps/oauth",
        }))
    }
}

async fn mock_user(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(format!("token {GITHUB_TOKEN}").as_str());

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Bad credentials" })),
        )
            .into_response();
    }

    Json(json!({
        "login": GITHUB_LOGIN,
        "id": 583231,
        "avatar_url": GITHUB_AVATAR,
        "name": "The Octocat",
        "type": "User",
        "site_admin": false,
    }))
    .into_response()
}
