//! OAuth connect flow
//!
//! - `config`: provider configuration document and its sources
//! - `route`: connect path matching
//! - `engine`: the protocol engine seam
//! - `oauth2`: OAuth 2.0 authorization code engine
//! - `handler`: HTTP adapter with one-time setup and cookie sessions
//! - `request`: query parsing and request debug snapshots

mod config;
mod engine;
mod handler;
mod oauth2;
mod request;
mod route;

pub use config::{
    ConfigSource, GrantConfig, GrantDefaults, GrantOverrides, ProviderConfig, ProviderOverrides,
};
pub use engine::{EngineFactory, GrantEngine, GrantParams, GrantRequest, GrantResponse};
pub use handler::{ErrorHandling, GrantHandler, GrantHandlerOptions, SessionOptions};
pub use oauth2::{OAuth2Engine, oauth2_engine_factory};
pub use request::{PrintableRequest, parse_query};
pub use route::{RouteMatch, RouteMatcher};
