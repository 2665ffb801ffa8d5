//! OAuth connect routes
//!
//! Every request no other route claims goes to the connect handler, which
//! decides on its own what matches. Its matcher is case-insensitive, so the
//! mount prefix cannot be a plain axum route.

use axum::{
    Router,
    extract::{Request, State},
    response::Response,
};

use crate::AppState;
use crate::error::AppError;

/// Create connect router
///
/// Routes:
/// - fallback: any method, any path; unmatched paths get the handler's 404
pub fn connect_router() -> Router<AppState> {
    Router::new().fallback(connect)
}

async fn connect(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    state.grant.handle(request, None).await
}
