//! Local users and GitHub-identified users
//!
//! Passwords are stored and compared as plaintext. This is not safe for
//! real deployments and needs a password hashing scheme before any such use.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::Deserialize;

use crate::data::{Database, NewUser, User};
use crate::error::{AppError, FormError};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Username and password as submitted by a form
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub fn validate_username(username: &str) -> Option<String> {
    (username.chars().count() < MIN_USERNAME_LEN).then(|| {
        format!("Usernames must be at least {MIN_USERNAME_LEN} characters long")
    })
}

pub fn validate_password(password: &str) -> Option<String> {
    (password.chars().count() < MIN_PASSWORD_LEN).then(|| {
        format!("Passwords must be at least {MIN_PASSWORD_LEN} characters long")
    })
}

/// Find the user matching the credentials.
///
/// Returns `None` both for unknown usernames and wrong passwords.
pub async fn login(db: &Database, credentials: &Credentials) -> Result<Option<User>, AppError> {
    let Some(user) = db.find_user_by_username(&credentials.username).await? else {
        return Ok(None);
    };

    if user.password != credentials.password {
        return Ok(None);
    }

    Ok(Some(user))
}

/// Create a user.
///
/// # Errors
/// `AppError::FormValidation` when the username is taken
pub async fn register(
    db: &Database,
    credentials: Credentials,
    metadata: Option<serde_json::Value>,
) -> Result<User, AppError> {
    let username = credentials.username.clone();

    if db.find_user_by_username(&username).await?.is_some() {
        return Err(username_taken(&username));
    }

    db.create_user(NewUser {
        username: credentials.username,
        password: credentials.password,
        metadata,
    })
    .await
    .map_err(|error| match error {
        AppError::Database(sqlx::Error::Database(ref e)) if e.is_unique_violation() => {
            username_taken(&username)
        }
        other => other,
    })
}

fn username_taken(username: &str) -> AppError {
    FormError::new(format!("User with username {username} already exists")).into()
}

// =============================================================================
// GitHub
// =============================================================================

/// Minimal view of the GitHub `/user` payload
///
/// The full payload is kept as user metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: u64,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
}

/// GitHub REST API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the profile of the token's owner.
    ///
    /// Returns `None` when GitHub rejects the token or the payload has no
    /// `login`; transport failures are errors. No retry.
    pub async fn fetch_user(
        &self,
        access_token: &str,
    ) -> Result<Option<(GitHubUser, serde_json::Value)>, AppError> {
        let response = self
            .http
            .get(format!("{}/user", self.api_url))
            .header(reqwest::header::AUTHORIZATION, format!("token {access_token}"))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "GitHub rejected access token");
            return Ok(None);
        }

        let raw: serde_json::Value = response.json().await?;
        match serde_json::from_value::<GitHubUser>(raw.clone()) {
            Ok(user) if !user.login.is_empty() => Ok(Some((user, raw))),
            _ => {
                tracing::warn!("GitHub profile has no login");
                Ok(None)
            }
        }
    }
}

/// Find or create the local user named after the GitHub login.
///
/// New users get the full GitHub profile as metadata and a random password
/// nobody knows, so they can only sign in through GitHub.
pub async fn login_github_user(
    db: &Database,
    profile: &GitHubUser,
    metadata: serde_json::Value,
) -> Result<User, AppError> {
    if let Some(user) = db.find_user_by_username(&profile.login).await? {
        return Ok(user);
    }

    tracing::info!(login = %profile.login, github_id = profile.id, "Creating user from GitHub profile");

    register(
        db,
        Credentials {
            username: profile.login.clone(),
            password: unusable_password(),
        },
        Some(metadata),
    )
    .await
}

fn unusable_password() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("!github:{}", URL_SAFE_NO_PAD.encode(bytes))
}
