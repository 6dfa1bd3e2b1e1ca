use crate::config::Config;
use crate::errors::AppError;
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};

pub const AUTH_COOKIE_NAME: &str = "quotelinker_admin_token";

/// Cookie lifetime: 7 days.
pub const AUTH_COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Compares SHA-256 digests in constant time so neither length nor content
/// leaks through timing.
pub fn token_matches(provided: &str, expected: &str) -> bool {
    let a = hex::encode(Sha256::digest(provided.as_bytes()));
    let b = hex::encode(Sha256::digest(expected.as_bytes()));

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Admin token from `Authorization: Bearer ...`, falling back to the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Gate for admin operations. With no `ADMIN_TOKEN` configured every admin
/// call is refused.
pub fn require_admin(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = config
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("ADMIN_TOKEN is not configured".to_string()))?;

    let provided = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing admin token".to_string()))?;

    if !token_matches(&provided, expected) {
        return Err(AppError::Unauthorized("Invalid admin token".to_string()));
    }

    Ok(())
}

/// `Set-Cookie` value for an authenticated admin session.
pub fn auth_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Max-Age={}; Path=/",
        AUTH_COOKIE_NAME, token, AUTH_COOKIE_MAX_AGE_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
