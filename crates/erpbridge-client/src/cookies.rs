//! Session token extraction from `Set-Cookie` headers
//!
//! HTTP stacks hand cookies back in one of two shapes: one header value per
//! cookie, or every cookie folded into one comma-joined string. Both shapes
//! go through [`extract_session_token`].

use regex::Regex;
use std::sync::OnceLock;

/// `Set-Cookie` values as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieHeader {
    /// One entry per `Set-Cookie` header
    Multi(Vec<String>),
    /// All cookies folded into a single comma-joined string
    Joined(String),
}

impl CookieHeader {
    pub fn empty() -> Self {
        CookieHeader::Multi(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CookieHeader::Multi(values) => values.iter().all(|v| v.trim().is_empty()),
            CookieHeader::Joined(value) => value.trim().is_empty(),
        }
    }
}

/// Find the value of `cookie_name` in either header shape.
///
/// Empty values and the deletion marker some servers send on logout
/// (`name=; Max-Age=0`) are not tokens.
pub fn extract_session_token(header: &CookieHeader, cookie_name: &str) -> Option<String> {
    match header {
        CookieHeader::Multi(values) => values
            .iter()
            .find_map(|value| token_from_single(value, cookie_name))
            // A proxy may still have folded several cookies into one entry
            .or_else(|| {
                values
                    .iter()
                    .find_map(|value| token_from_joined(value, cookie_name))
            }),
        CookieHeader::Joined(value) => token_from_joined(value, cookie_name),
    }
}

/// Parse one `name=value; Attr=...` cookie
fn token_from_single(value: &str, cookie_name: &str) -> Option<String> {
    let pair = value.split(';').next()?;
    let (name, token) = pair.split_once('=')?;
    if name.trim() != cookie_name {
        return None;
    }
    non_empty(token)
}

/// Scan a comma-joined header. Commas also appear inside `Expires=` dates,
/// so a cookie only starts at the beginning of the string or after a comma.
fn token_from_joined(value: &str, cookie_name: &str) -> Option<String> {
    joined_cookie_pattern()?
        .captures_iter(value)
        .filter(|caps| caps.get(1).is_some_and(|name| name.as_str() == cookie_name))
        .filter_map(|caps| caps.get(2))
        .find_map(|m| non_empty(m.as_str()))
}

/// `name=value` at the start of the header or right after a comma, compiled once
fn joined_cookie_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:^|,)\s*([^=;,\s]+)=([^;,]*)").ok())
        .as_ref()
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim().trim_matches('"');
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Render the request `Cookie` header for a session token
pub fn cookie_header_value(cookie_name: &str, token: &str) -> String {
    format!("{}={}", cookie_name, token)
}

/// Cookie names must be RFC 6265 tokens
pub fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c))
}
