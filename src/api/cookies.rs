//! Session cookie rendering and parsing.
//!
//! One cookie carries the raw client token: HttpOnly always, Secure outside
//! local development, SameSite=Lax, Path=/, Expires matching the session.
//! Deletion clears the same name and path.

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

use crate::config::SessionConfig;

/// Render the Set-Cookie value for a newly issued or refreshed token.
pub fn session_cookie(
    config: &SessionConfig,
    client_token: &str,
    expires_at: &DateTime<Utc>,
) -> HeaderValue {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Expires={}",
        config.cookie_name,
        client_token,
        imf_fixdate(expires_at)
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    header_value(cookie)
}

/// Render the Set-Cookie value that deletes the session cookie.
pub fn clear_session_cookie(config: &SessionConfig) -> HeaderValue {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        config.cookie_name
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    header_value(cookie)
}

/// Extract the session token from an inbound Cookie header, if present.
pub fn token_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == cookie_name && !value.is_empty()).then(|| value.to_string())
    })
}

/// RFC 7231 IMF-fixdate, the only Expires format every client accepts.
fn imf_fixdate(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn header_value(cookie: String) -> HeaderValue {
    // Token and cookie name are ASCII by construction
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}
