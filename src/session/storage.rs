//! Signed cookie session storage
//!
//! Cookie value format: base64(payload).base64(hmac_sha256(payload))
//!
//! The payload is the JSON session bag plus its expiry. The first secret
//! signs; every configured secret is accepted when verifying so secrets can
//! be rotated.

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{Session, SessionData};
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Literal value of a `Set-Cookie` response header.
pub type SetCookieHeaderValue = String;

/// Session cookie settings, fixed when the storage is built
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    /// Signing secrets; the first one signs new cookies
    pub secrets: Vec<String>,
    pub same_site: SameSite,
    pub path: String,
    /// Lifetime in seconds
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
}

impl CookieOptions {
    /// Lax, `/`-scoped, http-only, secure cookie living 30 days.
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secrets: vec![secret.into()],
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age: 60 * 60 * 24 * 30,
            http_only: true,
            secure: true,
        }
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// Cookie-backed session store
#[derive(Debug, Clone)]
pub struct CookieSessionStorage {
    options: CookieOptions,
}

impl CookieSessionStorage {
    /// # Errors
    /// Returns error if no secret or an empty secret is configured
    pub fn new(options: CookieOptions) -> Result<Self, AppError> {
        if options.secrets.is_empty() || options.secrets.iter().any(|s| s.is_empty()) {
            return Err(AppError::Config(format!(
                "session cookie '{}' needs a non-empty secret",
                options.name
            )));
        }
        Ok(Self { options })
    }

    /// Read the session carried by the request's `Cookie` header.
    ///
    /// A missing, tampered, expired or otherwise unreadable cookie yields an
    /// empty session.
    pub fn get_session(&self, headers: &HeaderMap) -> Session {
        let jar = CookieJar::from_headers(headers);
        let Some(cookie) = jar.get(&self.options.name) else {
            return Session::new();
        };

        match self.decode(cookie.value()) {
            Ok(data) => Session::from_data(data),
            Err(error) => {
                tracing::debug!(
                    cookie = %self.options.name,
                    %error,
                    "Discarding unreadable session cookie"
                );
                Session::new()
            }
        }
    }

    /// Sign the session and return the `Set-Cookie` value carrying it.
    pub fn commit_session(&self, session: &Session) -> Result<SetCookieHeaderValue, AppError> {
        let expires_at = Utc::now() + Duration::seconds(self.options.max_age);
        let token = self.encode(session.data(), expires_at)?;
        Ok(self.build_cookie(token, self.options.max_age).to_string())
    }

    /// Return a `Set-Cookie` value that clears the session cookie.
    pub fn destroy_session(&self, _session: &Session) -> SetCookieHeaderValue {
        let mut cookie = self.build_cookie(String::new(), 0);
        cookie.set_expires(time::OffsetDateTime::UNIX_EPOCH);
        cookie.to_string()
    }

    fn build_cookie(&self, value: String, max_age: i64) -> Cookie<'static> {
        Cookie::build((self.options.name.clone(), value))
            .path(self.options.path.clone())
            .http_only(self.options.http_only)
            .secure(self.options.secure)
            .same_site(self.options.same_site)
            .max_age(time::Duration::seconds(max_age))
            .build()
    }

    fn encode(&self, data: &SessionData, expires_at: DateTime<Utc>) -> Result<String, AppError> {
        let payload = serde_json::to_string(&SessionPayload {
            data: data.clone(),
            expires_at,
        })
        .map_err(|e| AppError::Internal(e.into()))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());

        let signature = sign(&self.options.secrets[0], &payload_b64)?;
        Ok(format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(signature)))
    }

    fn decode(&self, token: &str) -> Result<SessionData, AppError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(AppError::InvalidSession)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AppError::InvalidSession)?;

        let mut verified = false;
        for secret in &self.options.secrets {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| AppError::Encryption(e.to_string()))?;
            mac.update(payload_b64.as_bytes());
            if mac.verify_slice(&signature).is_ok() {
                verified = true;
                break;
            }
        }
        if !verified {
            return Err(AppError::InvalidSession);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AppError::InvalidSession)?;
        let payload: SessionPayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| AppError::InvalidSession)?;

        if payload.expires_at < Utc::now() {
            return Err(AppError::InvalidSession);
        }

        Ok(payload.data)
    }
}

fn sign(secret: &str, payload_b64: &str) -> Result<Vec<u8>, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(payload_b64.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header::COOKIE};
    use serde_json::json;

    fn storage(secret: &str) -> CookieSessionStorage {
        CookieSessionStorage::new(CookieOptions::new("oauth_session", secret)).unwrap()
    }

    fn request_headers(set_cookie: &str) -> HeaderMap {
        let pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(pair).unwrap());
        headers
    }

    #[test]
    fn commit_then_get_reproduces_session() {
        let storage = storage("a-very-long-secret-used-for-signing!");
        let mut session = Session::new();
        session.set("grant", json!({ "provider": "github", "state": "abc" }));
        session.set("count", 3);

        let set_cookie = storage.commit_session(&session).unwrap();
        let restored = storage.get_session(&request_headers(&set_cookie));

        assert_eq!(restored, session);
    }

    #[test]
    fn commit_sets_cookie_attributes() {
        let storage = storage("a-very-long-secret-used-for-signing!");
        let set_cookie = storage.commit_session(&Session::new()).unwrap();

        assert!(set_cookie.starts_with("oauth_session="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=2592000"));
    }

    #[test]
    fn missing_cookie_gives_empty_session() {
        let storage = storage("a-very-long-secret-used-for-signing!");
        assert!(storage.get_session(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn tampered_cookie_gives_empty_session() {
        let storage = storage("a-very-long-secret-used-for-signing!");
        let mut session = Session::new();
        session.set("userId", "1");
        let set_cookie = storage.commit_session(&session).unwrap();

        let pair = set_cookie.split(';').next().unwrap();
        let (name, value) = pair.split_once('=').unwrap();
        let (_, signature) = value.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_string(&json!({
                "data": { "userId": "2" },
                "expires_at": Utc::now() + Duration::days(1),
            }))
            .unwrap(),
        );
        let forged = format!("{name}={forged_payload}.{signature}");

        assert!(storage.get_session(&request_headers(&forged)).is_empty());
    }

    #[test]
    fn cookie_signed_with_other_secret_is_rejected() {
        let signer = storage("first-secret-first-secret-first-secret");
        let reader = storage("second-secret-second-secret-second-s");
        let mut session = Session::new();
        session.set("userId", "1");

        let set_cookie = signer.commit_session(&session).unwrap();
        assert!(reader.get_session(&request_headers(&set_cookie)).is_empty());
    }

    #[test]
    fn rotated_secret_still_verifies() {
        let old = storage("old-secret-old-secret-old-secret-old!");
        let mut options = CookieOptions::new("oauth_session", "new-secret-new-secret-new-secret-new!");
        options.secrets.push("old-secret-old-secret-old-secret-old!".to_string());
        let rotated = CookieSessionStorage::new(options).unwrap();

        let mut session = Session::new();
        session.set("userId", "1");
        let set_cookie = old.commit_session(&session).unwrap();

        assert_eq!(rotated.get_session(&request_headers(&set_cookie)), session);
    }

    #[test]
    fn expired_payload_is_rejected() {
        let storage = storage("a-very-long-secret-used-for-signing!");
        let mut data = SessionData::new();
        data.insert("userId".into(), json!("1"));

        let token = storage
            .encode(&data, Utc::now() - Duration::seconds(1))
            .unwrap();
        assert!(storage.decode(&token).is_err());
    }

    #[test]
    fn destroy_expires_cookie() {
        let storage = storage("a-very-long-secret-used-for-signing!");
        let set_cookie = storage.destroy_session(&Session::new());

        assert!(set_cookie.starts_with("oauth_session=;"));
        assert!(set_cookie.contains("Max-Age=0"));
        assert!(set_cookie.contains("1970"));
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        let result = CookieSessionStorage::new(CookieOptions::new("oauth_session", ""));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
