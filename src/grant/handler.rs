//! OAuth connect handler
//!
//! Bridges HTTP requests and a [`GrantEngine`]:
//!
//! 1. Setup (once per handler): resolve the provider config, build the
//!    engine, the OAuth session cookie store and the route matcher
//! 2. Match the path; unmatched paths get a bare 404
//! 3. Load the OAuth session from the `Cookie` header
//! 4. Run the engine with method, path params, query, body, session data
//!    and the caller's runtime overrides
//! 5. Replace the session with exactly what the engine returned
//! 6. Redirect to the engine's location, or answer with an empty body,
//!    always carrying the new `Set-Cookie`
//!
//! With error interception enabled, an `error` parameter in the location's
//! query string turns the response into `400 {"error": ...}`. This depends on
//! how the engine encodes errors into redirects and is a best-effort check.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::OnceCell;

use super::config::{ConfigSource, GrantOverrides};
use super::engine::{EngineFactory, GrantEngine, GrantParams, GrantRequest, GrantResponse};
use super::request::{PrintableRequest, parse_query};
use super::route::RouteMatcher;
use crate::error::AppError;
use crate::metrics::{CONNECT_REQUESTS_TOTAL, CONNECT_SETUPS_TOTAL};
use crate::session::{CookieOptions, CookieSessionStorage, Session};

const DEFAULT_SESSION_NAME: &str = "oauth_session";
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// OAuth session cookie name and secret
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Defaults to "oauth_session"
    pub name: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandling {
    /// Answer `400 {"error": ...}` instead of redirecting when the
    /// engine's location carries an `error` parameter
    pub intercept: bool,
}

#[derive(Debug, Clone)]
pub struct GrantHandlerOptions {
    pub config: ConfigSource,
    pub session: SessionOptions,
    pub debug: bool,
    pub error_handling: ErrorHandling,
    pub secure_cookies: bool,
}

struct GrantSetup {
    engine: Arc<dyn GrantEngine>,
    storage: CookieSessionStorage,
    matcher: RouteMatcher,
}

pub struct GrantHandler {
    options: GrantHandlerOptions,
    factory: EngineFactory,
    setup: OnceCell<GrantSetup>,
}

impl GrantHandler {
    pub fn new(options: GrantHandlerOptions, factory: EngineFactory) -> Self {
        Self {
            options,
            factory,
            setup: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.setup.initialized()
    }

    /// Read the OAuth session of a request.
    ///
    /// # Errors
    /// `AppError::Uninitialized` until the first request has completed setup
    pub fn session(&self, headers: &HeaderMap) -> Result<Session, AppError> {
        let setup = self
            .setup
            .get()
            .ok_or(AppError::Uninitialized("get_session"))?;
        Ok(setup.storage.get_session(headers))
    }

    async fn setup(&self) -> Result<&GrantSetup, AppError> {
        self.setup.get_or_try_init(|| self.run_setup()).await
    }

    async fn run_setup(&self) -> Result<GrantSetup, AppError> {
        if self.options.debug {
            tracing::debug!(
                config = ?self.options.config,
                session_name = ?self.options.session.name,
                intercept = self.options.error_handling.intercept,
                "Setting up connect handler"
            );
        }

        let config = self.options.config.resolve().await?;
        if self.options.debug {
            tracing::debug!(?config, "Resolved OAuth provider config");
        }

        let name = self
            .options
            .session
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
        let secret =
            self.options.session.secret.clone().ok_or_else(|| {
                AppError::Config("OAuth session secret is not configured".to_string())
            })?;
        let storage = CookieSessionStorage::new(
            CookieOptions::new(name, secret).secure(self.options.secure_cookies),
        )?;

        let engine = (self.factory)(Arc::new(config));
        let matcher = RouteMatcher::new(&engine.config().defaults.prefix)?;

        CONNECT_SETUPS_TOTAL.inc();
        tracing::info!(
            prefix = %engine.config().defaults.prefix,
            providers = engine.config().providers.len(),
            "Connect handler initialized"
        );

        Ok(GrantSetup {
            engine,
            storage,
            matcher,
        })
    }

    /// Run one connect request through the engine.
    ///
    /// # Errors
    /// Setup failures and engine errors propagate unchanged
    pub async fn handle(
        &self,
        request: Request<Body>,
        overrides: Option<GrantOverrides>,
    ) -> Result<Response, AppError> {
        let setup = self.setup().await?;

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::Validation(format!("unreadable request body: {e}")))?;

        if self.options.debug {
            tracing::debug!(
                request = ?PrintableRequest::new(&parts, &body),
                "Connect request"
            );
        }

        let path = parts.uri.path();
        let matched = setup.matcher.matches(path);
        if self.options.debug {
            tracing::debug!(%path, ?matched, "Connect route match");
        }
        let Some(matched) = matched else {
            CONNECT_REQUESTS_TOTAL.with_label_values(&["not_found"]).inc();
            return Ok(StatusCode::NOT_FOUND.into_response());
        };

        let mut session = setup.storage.get_session(&parts.headers);
        if self.options.debug {
            tracing::debug!(session = ?session.data(), "Incoming OAuth session");
            tracing::debug!(
                provider = %matched.provider,
                override_segment = ?matched.r#override,
                "Connect provider"
            );
        }

        let GrantResponse {
            location,
            session: grant_session,
        } = setup
            .engine
            .handle(GrantRequest {
                method: parts.method.clone(),
                params: GrantParams {
                    provider: matched.provider,
                    r#override: matched.r#override,
                },
                query: parse_query(parts.uri.query().unwrap_or_default()),
                body,
                session: session.data().clone(),
                state: overrides,
            })
            .await?;

        let previous: Vec<String> = session.keys().cloned().collect();
        for key in &previous {
            session.unset(key);
        }
        for (key, value) in grant_session {
            session.set(key, value);
        }

        if self.options.debug {
            tracing::debug!(session = ?session.data(), "Outgoing OAuth session");
        }

        let set_cookie = setup.storage.commit_session(&session)?;

        if self.options.error_handling.intercept {
            if let Some(message) = location.as_deref().and_then(error_from_location) {
                tracing::error!(error = %message, "OAuth flow returned an error");
                CONNECT_REQUESTS_TOTAL
                    .with_label_values(&["intercepted"])
                    .inc();
                return Ok((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": message })),
                )
                    .into_response());
            }
        }

        let response = match location {
            Some(location) => {
                CONNECT_REQUESTS_TOTAL.with_label_values(&["redirect"]).inc();
                (
                    StatusCode::FOUND,
                    [(header::LOCATION, location), (header::SET_COOKIE, set_cookie)],
                )
                    .into_response()
            }
            None => {
                CONNECT_REQUESTS_TOTAL.with_label_values(&["empty"]).inc();
                (StatusCode::OK, [(header::SET_COOKIE, set_cookie)]).into_response()
            }
        };

        if self.options.debug {
            tracing::debug!(status = %response.status(), headers = ?response.headers(), "Connect response");
        }

        Ok(response)
    }
}

/// Value of the `error` query parameter of a redirect location, if any.
fn error_from_location(location: &str) -> Option<String> {
    let (_, query) = location.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "error")
        .map(|(_, value)| value.into_owned())
}
