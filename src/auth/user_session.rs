//! User session cookie
//!
//! Holds a single `userId` entry identifying the signed-in user.

use axum::http::HeaderMap;

use crate::config::AppConfig;
use crate::data::{Database, User};
use crate::error::AppError;
use crate::session::{CookieOptions, CookieSessionStorage, Session, SetCookieHeaderValue};

const USER_ID_KEY: &str = "userId";

pub struct UserSessionStorage {
    storage: CookieSessionStorage,
}

impl UserSessionStorage {
    pub fn new(options: CookieOptions) -> Result<Self, AppError> {
        Ok(Self {
            storage: CookieSessionStorage::new(options)?,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            CookieOptions::new(&config.session.name, &config.session.secret)
                .max_age(config.session.max_age)
                .secure(config.should_use_secure_cookies()),
        )
    }

    pub fn get_user_session(&self, headers: &HeaderMap) -> Session {
        self.storage.get_session(headers)
    }

    pub fn get_user_id(&self, headers: &HeaderMap) -> Result<String, AppError> {
        self.get_user_session(headers)
            .get_str(USER_ID_KEY)
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidUser("no user in session".to_string()))
    }

    /// Like [`Self::get_user_id`], for handlers that cannot proceed without a user.
    pub fn require_user_id(&self, headers: &HeaderMap) -> Result<String, AppError> {
        self.get_user_id(headers).map_err(|_| {
            tracing::debug!("Request without a signed-in user");
            AppError::InvalidUser("Invalid user ID".to_string())
        })
    }

    /// Load the signed-in user.
    ///
    /// # Errors
    /// - `AppError::InvalidUser` without a user id in the session
    /// - `AppError::UserNotFound` when the id has no record
    pub async fn get_user(&self, db: &Database, headers: &HeaderMap) -> Result<User, AppError> {
        let user_id = self.get_user_id(headers)?;
        db.find_user_by_id(&user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(format!("Unable to find user ID {user_id}")))
    }

    pub fn logout(&self, headers: &HeaderMap) -> SetCookieHeaderValue {
        let session = self.get_user_session(headers);
        self.storage.destroy_session(&session)
    }

    pub fn create_user_session(&self, user_id: &str) -> Result<SetCookieHeaderValue, AppError> {
        let mut session = Session::new();
        session.set(USER_ID_KEY, user_id);
        self.storage.commit_session(&session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header::COOKIE};

    fn storage() -> UserSessionStorage {
        UserSessionStorage::new(
            CookieOptions::new("app_session", "user-session-test-secret-0123456789").secure(false),
        )
        .unwrap()
    }

    fn headers_for(set_cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(set_cookie.split(';').next().unwrap()).unwrap(),
        );
        headers
    }

    #[test]
    fn created_session_carries_user_id() {
        let storage = storage();
        let set_cookie = storage.create_user_session("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();

        assert!(set_cookie.starts_with("app_session="));
        let headers = headers_for(&set_cookie);
        assert_eq!(
            storage.get_user_id(&headers).unwrap(),
            "01ARZ3NDEKTSV4RRFFQ69G5FAV"
        );
        assert_eq!(storage.get_user_session(&headers).keys().count(), 1);
    }

    #[test]
    fn missing_user_id_is_invalid_user() {
        let storage = storage();

        assert!(matches!(
            storage.get_user_id(&HeaderMap::new()),
            Err(AppError::InvalidUser(_))
        ));
        assert!(matches!(
            storage.require_user_id(&HeaderMap::new()),
            Err(AppError::InvalidUser(message)) if message == "Invalid user ID"
        ));
    }

    #[test]
    fn logout_clears_cookie() {
        let storage = storage();
        let set_cookie = storage.create_user_session("1").unwrap();

        let cleared = storage.logout(&headers_for(&set_cookie));
        assert!(cleared.starts_with("app_session=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn get_user_reports_unknown_id() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::connect(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let storage = storage();
        let set_cookie = storage.create_user_session("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();

        let error = storage
            .get_user(&db, &headers_for(&set_cookie))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            AppError::UserNotFound(message)
                if message == "Unable to find user ID 01ARZ3NDEKTSV4RRFFQ69G5FAV"
        ));
    }
}
