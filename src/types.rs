//! Type definitions for authentication and the backend wire format

use serde::{Deserialize, Serialize};

/// Cached profile of the logged-in user
///
/// Fields the backend did not send stay absent when serialized, and unknown
/// fields (`role`, `phone_number`, ...) are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Role of the user (admin, supervisor, operator, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    /// Assigned abattoir (facility): an id or a nested object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abattoir: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_superuser: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserRecord {
    /// `user_type`, or the `role` field some endpoints send instead
    pub fn role(&self) -> Option<&str> {
        self.user_type
            .as_deref()
            .or_else(|| self.extra.get("role").and_then(|v| v.as_str()))
    }

    /// Id of the assigned abattoir, whether sent as an id or as `{id, ...}`
    pub fn abattoir_id(&self) -> Option<i64> {
        match self.abattoir.as_ref()? {
            serde_json::Value::Object(facility) => facility.get("id").and_then(|id| id.as_i64()),
            other => other.as_i64(),
        }
    }

    /// Display name, falling back to the username when no name is set
    pub fn full_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if name.is_empty() {
            self.username.clone()
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    /// Kept as sent so the cached record is exactly the backend's object
    pub user: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}

/// Error body returned by the backend
#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    non_field_errors: Vec<String>,
}

/// Pull a human-readable message out of a backend error body
///
/// Checks `detail`, `message`, `error` and the first `non_field_errors` entry,
/// in that order. Returns `None` when the body is not JSON or carries none of them.
pub fn extract_error_message(body: &str) -> Option<String> {
    let payload: ErrorPayload = serde_json::from_str(body).ok()?;

    payload
        .detail
        .or(payload.message)
        .or(payload.error)
        .or_else(|| payload.non_field_errors.into_iter().next())
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty())
}
