//! OAuth flow engine interface
//!
//! The connect handler owns cookies and routing; everything protocol
//! specific happens behind [`GrantEngine`].

use std::sync::Arc;

use axum::async_trait;
use axum::body::Bytes;
use axum::http::Method;
use serde_json::{Map, Value};

use super::config::{GrantConfig, GrantOverrides};
use crate::error::AppError;
use crate::session::SessionData;

/// Path parameters of a connect request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantParams {
    pub provider: String,
    pub r#override: Option<String>,
}

/// Everything the engine sees of one request
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub method: Method,
    pub params: GrantParams,
    pub query: Map<String, Value>,
    /// Raw request body, passed through untouched
    pub body: Bytes,
    pub session: SessionData,
    /// Runtime overrides supplied by the caller
    pub state: Option<GrantOverrides>,
}

/// Engine outcome: where to send the browser and what the session becomes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantResponse {
    pub location: Option<String>,
    pub session: SessionData,
}

#[async_trait]
pub trait GrantEngine: Send + Sync {
    /// Configuration the engine was built with
    fn config(&self) -> &GrantConfig;

    async fn handle(&self, request: GrantRequest) -> Result<GrantResponse, AppError>;
}

/// Builds an engine bound to a resolved configuration
pub type EngineFactory = Arc<dyn Fn(Arc<GrantConfig>) -> Arc<dyn GrantEngine> + Send + Sync>;
