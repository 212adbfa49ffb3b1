//! Authenticated HTTP client for the admin API
//!
//! Every request goes out with the current bearer token when one is valid.
//! A `401 Unauthorized` triggers one shared token refresh and a single replay
//! of the original request.

use crate::error::{ClientError, Result};
use crate::session::SessionManager;
use crate::types::extract_error_message;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Macro to map a non-success response to `ClientError::Api`
macro_rules! check_response {
    ($response:expr) => {
        if !$response.status().is_success() {
            let status = $response.status();
            let text = $response.text().await.unwrap_or_default();
            let message = extract_error_message(&text).unwrap_or(text);
            return Err(ClientError::Api { status, message });
        }
    };
}

/// HTTP client shared by every API-calling module
///
/// Cheap to clone; clones share the session and the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionManager>,
    http_client: Client,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        let http_client = session.http_client().clone();
        Self {
            session,
            http_client,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Start a request to an API path, e.g. `/api/animals/`
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client.request(method, self.session.config().url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Build and send a request through the auth layer
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Send a request with bearer injection and 401 recovery
    ///
    /// The returned response may still carry an error status; only transport
    /// failures and an unrecoverable session are returned as errors. A request
    /// is replayed at most once: a second 401 is handed back to the caller.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let sent_token = self.session.valid_access_token();
        if let Some(token) = sent_token.as_deref() {
            set_bearer(&mut request, token)?;
        }

        // Requests with streaming bodies can't be cloned and are never replayed
        let replay = request.try_clone();

        let response = self.http_client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            debug!(url = %response.url(), "Unauthorized response for a non-replayable request");
            return Ok(response);
        };

        let token = match self.recover_token(sent_token.as_deref()).await {
            Ok(token) => token,
            Err(e) => {
                warn!(url = %response.url(), error = %e, "Could not recover from unauthorized response");
                self.session.expire().await;
                return Err(ClientError::SessionExpired);
            }
        };

        debug!(method = %replay.method(), url = %replay.url(), "Replaying request with refreshed token");
        set_bearer(&mut replay, &token)?;

        Ok(self.http_client.execute(replay).await?)
    }

    /// Token to replay with after a 401
    ///
    /// If another request already replaced the token we were rejected with,
    /// that token is reused; otherwise this joins the single in-flight refresh.
    async fn recover_token(&self, rejected: Option<&str>) -> Result<String> {
        if let Some(current) = self.session.valid_access_token() {
            if rejected != Some(current.as_str()) {
                return Ok(current);
            }
        }

        self.session.refresh_shared().await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(self.get(path)).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.post(path).json(body)).await
    }

    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.put(path).json(body)).await
    }

    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.patch(path).json(body)).await
    }

    /// Delete a resource, ignoring any response body
    pub async fn delete_resource(&self, path: &str) -> Result<()> {
        let response = self.send(self.delete(path)).await?;
        check_response!(response);
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        check_response!(response);

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(format!("unexpected response body: {e}")))
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
