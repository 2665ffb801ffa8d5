//! Request echo endpoint
//!
//! Answers with what the server saw of the request, plus the OAuth session
//! once the connect handler has been set up.

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    routing::get,
};
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;
use crate::grant::PrintableRequest;
use crate::session::SessionData;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct EchoResponse {
    request: PrintableRequest,
    params: HashMap<String, String>,
    /// `None` until the first connect request has set up the handler
    grant_session: Option<SessionData>,
}

/// Create echo router
///
/// Routes:
/// - GET|POST /echo
/// - GET|POST /echo/*path
pub fn echo_router() -> Router<AppState> {
    Router::new()
        .route("/echo", get(echo).post(echo))
        .route("/echo/*path", get(echo).post(echo))
}

async fn echo(
    State(state): State<AppState>,
    params: Option<Path<HashMap<String, String>>>,
    request: Request,
) -> Result<Json<EchoResponse>, AppError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::Validation(format!("unreadable request body: {e}")))?;
    let request = PrintableRequest::new(&parts, &body);

    tracing::debug!(?request, "Echo request");

    let grant_session = match state.grant.session(&parts.headers) {
        Ok(session) => Some(session.into_data()),
        Err(AppError::Uninitialized(_)) => None,
        Err(error) => return Err(error),
    };

    Ok(Json(EchoResponse {
        request,
        params: params.map(|Path(params)| params).unwrap_or_default(),
        grant_session,
    }))
}
