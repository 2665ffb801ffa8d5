//! User authentication
//!
//! Handles:
//! - Password login and registration
//! - GitHub login from an OAuth access token
//! - User session cookie
//! - Login, logout and home pages

mod routes;
mod user_session;
mod users;

pub use routes::auth_router;
pub use user_session::UserSessionStorage;
pub use users::{
    Credentials, GitHubClient, GitHubUser, login, login_github_user, register, validate_password,
    validate_username,
};
