//! GrantGate - GitHub login through an OAuth connect handler
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Connect routes (<prefix>/<provider>[/<override>])        │
//! │  - Login/logout/home pages                                  │
//! │  - Echo, health, metrics                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Connect Handler (grant)                     │
//! │  - One-time setup: config, engine, cookie store, matcher    │
//! │  - OAuth 2.0 authorization code engine                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Sessions & Data Layer                        │
//! │  - Signed cookie sessions                                   │
//! │  - SQLite users (sqlx)                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: connect (router fallback), echo and metrics endpoints
//! - `auth`: users, user session and pages
//! - `grant`: OAuth connect handler and engine
//! - `session`: signed cookie session storage
//! - `data`: SQLite database
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod grant;
pub mod metrics;
pub mod session;

use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// OAuth connect handler
    pub grant: Arc<grant::GrantHandler>,

    /// User session cookie
    pub user_sessions: Arc<auth::UserSessionStorage>,

    /// GitHub profile client
    pub github: Arc<auth::GitHubClient>,
}

impl AppState {
    /// Initialize application state
    ///
    /// The OAuth provider document at `oauth.config_path` is read on the
    /// first connect request, falling back to the example config.
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let source = grant::ConfigSource::file_or_example(config.oauth.config_path.clone());
        Self::with_grant_source(config, source).await
    }

    /// Initialize application state with an explicit provider config source
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the shared HTTP client
    /// 3. Build the user session storage
    /// 4. Build the connect handler (set up lazily on first use)
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn with_grant_source(
        config: config::AppConfig,
        source: grant::ConfigSource,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(&config.database.path).await?;

        // 2. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("GrantGate/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        // 3. User sessions
        let user_sessions = auth::UserSessionStorage::from_config(&config)?;

        // 4. Connect handler
        let grant = grant::GrantHandler::new(
            grant::GrantHandlerOptions {
                config: source,
                session: grant::SessionOptions {
                    name: config.oauth.session_name.clone(),
                    secret: Some(config.oauth_session_secret().to_string()),
                },
                debug: config.oauth.debug,
                error_handling: grant::ErrorHandling {
                    intercept: config.oauth.intercept_errors,
                },
                secure_cookies: config.should_use_secure_cookies(),
            },
            grant::oauth2_engine_factory(http_client.clone()),
        );

        let github = auth::GitHubClient::new(http_client, &config.oauth.github_api_url);

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            grant: Arc::new(grant),
            user_sessions: Arc::new(user_sessions),
            github: Arc::new(github),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router())
        .merge(api::connect_router())
        .merge(api::echo_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
