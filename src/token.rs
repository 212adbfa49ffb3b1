//! JWT inspection and expiry checks
//!
//! Tokens are decoded without signature verification: the backend is the only
//! party that trusts them, the client only needs `exp` to decide when to refresh.
//! None of these functions fail; malformed tokens are reported as invalid.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims carried by access and refresh tokens
///
/// Read leniently: a claim with an unexpected type is left as `None`. Only
/// `exp` decides whether a token is usable.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    /// `user_id`, or `sub` when absent
    pub user_id: Option<Value>,
    pub username: Option<String>,
    pub email: Option<String>,
    /// `user_type`, or `role` when absent
    pub user_type: Option<String>,
    /// Assigned abattoir (facility) id
    pub abattoir: Option<i64>,
    pub is_superuser: Option<bool>,
    pub iat: Option<i64>,
    /// Expiry as unix seconds
    pub exp: i64,
    pub jti: Option<String>,
    pub token_type: Option<String>,
}

impl TokenClaims {
    fn from_payload(payload: &Value) -> Option<Self> {
        Some(Self {
            user_id: payload.get("user_id").or_else(|| payload.get("sub")).cloned(),
            username: text_claim(payload, "username"),
            email: text_claim(payload, "email"),
            user_type: text_claim(payload, "user_type").or_else(|| text_claim(payload, "role")),
            abattoir: payload.get("abattoir").and_then(int_value),
            is_superuser: payload.get("is_superuser").and_then(bool_value),
            iat: payload.get("iat").and_then(int_value),
            exp: expiry_secs(payload)?,
            jti: text_claim(payload, "jti"),
            token_type: text_claim(payload, "token_type"),
        })
    }

    pub fn is_expired_at(&self, now_ms: u128) -> bool {
        expires_at_ms(self.exp).map_or(true, |exp| exp <= now_ms)
    }
}

fn text_claim(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `exp` claim as unix seconds; NumericDate may carry a fraction
fn expiry_secs(payload: &Value) -> Option<i64> {
    let exp = payload.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

fn expires_at_ms(exp_secs: i64) -> Option<u128> {
    u128::try_from(exp_secs).ok().map(|secs| secs * 1000)
}

/// Current time in milliseconds since the unix epoch
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Decode the payload of a JWT into a JSON object
///
/// Returns `None` unless the token has three segments and a base64url JSON
/// object as payload.
pub fn decode_payload(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    if header.is_empty() || payload.is_empty() {
        return None;
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<Value>(&payload_bytes)
        .ok()
        .filter(Value::is_object)
}

/// Decode the claims of a JWT, `None` if it is malformed or has no numeric `exp`
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    TokenClaims::from_payload(&decode_payload(token)?)
}

/// Expiry of a token in unix milliseconds, read from `exp` alone
fn token_expiry_ms(token: &str) -> Option<u128> {
    decode_payload(token)
        .as_ref()
        .and_then(expiry_secs)
        .and_then(expires_at_ms)
}

pub fn is_token_valid(token: Option<&str>) -> bool {
    is_token_valid_at(token, now_ms())
}

pub fn is_token_valid_at(token: Option<&str>, now_ms: u128) -> bool {
    token
        .and_then(token_expiry_ms)
        .is_some_and(|exp| exp > now_ms)
}

/// True when the token is still valid but expires within `lookahead`.
///
/// An already expired token is not "expiring soon".
pub fn is_token_expiring_soon(token: Option<&str>, lookahead: Duration) -> bool {
    is_token_expiring_soon_at(token, lookahead, now_ms())
}

pub fn is_token_expiring_soon_at(token: Option<&str>, lookahead: Duration, now_ms: u128) -> bool {
    let remaining = time_until_expiration_at(token, now_ms);
    !remaining.is_zero() && remaining <= lookahead
}

/// Time left before the token expires, zero for missing, malformed or expired tokens
pub fn time_until_expiration(token: Option<&str>) -> Duration {
    time_until_expiration_at(token, now_ms())
}

pub fn time_until_expiration_at(token: Option<&str>, now_ms: u128) -> Duration {
    let Some(expires_at) = token.and_then(token_expiry_ms) else {
        return Duration::ZERO;
    };

    let remaining = expires_at.saturating_sub(now_ms);
    Duration::from_millis(u64::try_from(remaining).unwrap_or(u64::MAX))
}
