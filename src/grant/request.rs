//! Request helpers: query parsing and a loggable request snapshot

use std::collections::BTreeMap;

use axum::http::request::Parts;
use serde::Serialize;
use serde_json::{Map, Value};

/// Parse a raw query string into a map.
///
/// Repeated keys collect into an array in order of appearance.
pub fn parse_query(raw: &str) -> Map<String, Value> {
    let mut query = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let value = Value::String(value.into_owned());
        match query.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                query.insert(key.into_owned(), value);
            }
        }
    }
    query
}

/// Serializable snapshot of a request, for debug logs and the echo route
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintableRequest {
    pub url: String,
    pub method: String,
    pub search_params: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl PrintableRequest {
    pub fn new(parts: &Parts, body: &[u8]) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Self {
            url: parts.uri.to_string(),
            method: parts.method.to_string(),
            search_params: parse_query(parts.uri.query().unwrap_or_default()),
            headers,
            body: (!body.is_empty()).then(|| String::from_utf8_lossy(body).into_owned()),
        }
    }
}
