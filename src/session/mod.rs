//! Cookie-backed sessions
//!
//! A [`Session`] is a mutable key-value bag. [`CookieSessionStorage`]
//! serializes it into an HMAC-signed cookie and reads it back.
//! No server-side session storage needed.

mod storage;

use std::collections::BTreeMap;

use serde_json::Value;

pub use storage::{CookieOptions, CookieSessionStorage, SetCookieHeaderValue};

/// Session contents, ordered by key so the encoded cookie is deterministic.
pub type SessionData = BTreeMap<String, Value>;

/// Per-request session bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    data: SessionData,
}

impl Session {
    /// Create an empty session
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: SessionData) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value only if it is a JSON string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn into_data(self) -> SessionData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_unset() {
        let mut session = Session::new();
        assert!(session.is_empty());

        session.set("userId", "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        session.set("grant", json!({ "provider": "github" }));

        assert_eq!(session.get_str("userId"), Some("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
        assert_eq!(session.get("grant").unwrap()["provider"], "github");
        assert!(session.get_str("grant").is_none());

        assert!(session.unset("userId").is_some());
        assert!(session.get("userId").is_none());
        assert_eq!(session.keys().collect::<Vec<_>>(), vec!["grant"]);
    }
}
