//! Connect route matching
//!
//! Paths look like `<prefix>/<provider>[/<override>]`, optionally followed
//! by a trailing slash or a query string. Matching ignores ASCII case.

use regex::Regex;

use crate::error::AppError;

/// Provider and override extracted from a connect path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    pub provider: String,
    pub r#override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RouteMatcher {
    regex: Regex,
}

impl RouteMatcher {
    pub fn new(prefix: &str) -> Result<Self, AppError> {
        let pattern = [
            "(?i)^",
            &regex::escape(prefix),
            r"(?:/([^/?]+?))",
            r"(?:/([^/?]+?))?",
            r"(?:/$|/?\?+.*)?$",
        ]
        .concat();

        let regex = Regex::new(&pattern)
            .map_err(|e| AppError::Config(format!("invalid connect prefix '{prefix}': {e}")))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, path: &str) -> Option<RouteMatch> {
        let captures = self.regex.captures(path)?;
        Some(RouteMatch {
            provider: captures.get(1)?.as_str().to_string(),
            r#override: captures.get(2).map(|m| m.as_str().to_string()),
        })
    }
}
