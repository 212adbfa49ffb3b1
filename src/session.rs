// Session manager: login/logout, token refresh and cached user state

use crate::config::{ClientConfig, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{ClientError, Result};
use crate::token::{self, TokenClaims};
use crate::token_store::{SessionStorage, StorageSlot};
use crate::types::*;
use async_singleflight::Group;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fallback shown when a rejected login carries no readable message
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed. Please check your credentials.";

const REFRESH_KEY: &str = "refresh";

/// Session lifecycle notifications
///
/// `Expired` means the session could not be refreshed and was cleared; the UI
/// should send the user back to the login entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    TokenRefreshed,
    LoggedOut,
    Expired,
}

/// Owner of the access/refresh tokens and the cached user record
///
/// Constructed once and shared (`Arc`) with the [`ApiClient`](crate::ApiClient)
/// and whatever UI code needs session state.
pub struct SessionManager {
    config: ClientConfig,
    storage: Arc<dyn SessionStorage>,
    http_client: Client,
    /// Serializes slot writes so a refresh can't overwrite a concurrent login
    write_lock: Mutex<()>,
    /// Concurrent refreshes join the one already in flight; errors travel as messages
    refresh_singleflight: Group<String, String>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a session manager and its shared HTTP client
    ///
    /// The HTTP client gets the configured timeout and is reused by every
    /// [`ApiClient`](crate::ApiClient) built from this manager.
    pub fn new(config: ClientConfig, storage: Arc<dyn SessionStorage>) -> Result<Arc<Self>> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_http_client(config, storage, http_client))
    }

    pub fn with_http_client(
        config: ClientConfig,
        storage: Arc<dyn SessionStorage>,
        http_client: Client,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);

        Arc::new(Self {
            config,
            storage,
            http_client,
            write_lock: Mutex::new(()),
            refresh_singleflight: Group::new(),
            events,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Log in and persist the access token, refresh token and user record
    ///
    /// The user object is cached exactly as the backend sent it. On rejection
    /// the backend's message is returned as [`ClientError::InvalidCredentials`]
    /// and the stored session is left untouched.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserRecord> {
        let url = self.config.url(LOGIN_PATH);
        debug!(username = %username, "Logging in");

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };

        let response = self.http_client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
            warn!(username = %username, status = %status, error = %message, "Login rejected");
            return Err(ClientError::InvalidCredentials(message));
        }

        let login: LoginResponse = response.json().await?;
        let user: UserRecord = serde_json::from_value(login.user.clone())?;
        let user_json = login.user.to_string();

        {
            let _guard = self.write_lock.lock().await;
            let previous = StorageSlot::ALL.map(|slot| self.storage.get(slot));

            let written = self
                .storage
                .set(StorageSlot::AccessToken, &login.access)
                .and_then(|_| self.storage.set(StorageSlot::RefreshToken, &login.refresh))
                .and_then(|_| self.storage.set(StorageSlot::User, &user_json));

            if let Err(e) = written {
                warn!(error = %e, "Failed to persist session, restoring previous one");
                self.restore(&previous);
                return Err(e);
            }
        }

        info!(username = %user.username, user_id = user.id, "Logged in");
        self.emit(SessionEvent::LoggedIn);

        Ok(user)
    }

    /// Put every slot back to the values captured before a failed write
    fn restore(&self, previous: &[Option<String>; 3]) {
        for (slot, value) in StorageSlot::ALL.into_iter().zip(previous) {
            let restored = match value {
                Some(value) => self.storage.set(slot, value),
                None => self.storage.remove(slot),
            };
            if let Err(e) = restored {
                warn!(slot = slot.key(), error = %e, "Failed to restore session slot");
            }
        }
    }

    /// Log out: notify the backend (best effort) and clear the local session
    ///
    /// Never fails. Local credentials are cleared even when the backend is unreachable.
    pub async fn logout(&self) {
        let url = self.config.url(LOGOUT_PATH);
        let mut request = self.http_client.post(&url);
        if let Some(token) = self.access_token() {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Backend acknowledged logout");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Logout notification rejected");
            }
            Err(e) => {
                warn!(error = %e, "Logout notification failed");
            }
        }

        self.clear().await;
        info!("Logged out");
        self.emit(SessionEvent::LoggedOut);
    }

    /// Exchange the stored refresh token for a new access token
    ///
    /// Fails without any network call when no refresh token is stored or it is
    /// expired or malformed. Only the access-token slot is written. Callers
    /// should treat any error as a lost session.
    pub async fn refresh_token(&self) -> Result<String> {
        let refresh = self
            .storage
            .get(StorageSlot::RefreshToken)
            .ok_or(ClientError::NoRefreshToken)?;

        if !token::is_token_valid(Some(refresh.as_str())) {
            debug!("Stored refresh token is expired or malformed");
            return Err(ClientError::RefreshTokenInvalid);
        }

        let url = self.config.url(REFRESH_PATH);
        let request = RefreshRequest {
            refresh: refresh.clone(),
        };

        let response = self.http_client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or(body);
            warn!(status = %status, error = %message, "Token refresh rejected");
            return Err(ClientError::Authentication(format!(
                "Token refresh failed with status {status}: {message}"
            )));
        }

        let refreshed: RefreshResponse = response.json().await?;

        let guard = self.write_lock.lock().await;
        if self.storage.get(StorageSlot::RefreshToken).as_deref() != Some(refresh.as_str()) {
            // Logged out or logged in again while the request was in flight
            warn!("Session changed during token refresh, discarding refreshed token");
            return self
                .valid_access_token()
                .ok_or_else(|| ClientError::Authentication("Session changed during token refresh".to_string()));
        }
        self.storage.set(StorageSlot::AccessToken, &refreshed.access)?;
        drop(guard);

        info!("Access token refreshed successfully");
        self.emit(SessionEvent::TokenRefreshed);

        Ok(refreshed.access)
    }

    /// Refresh the access token, sharing a single in-flight request between
    /// all concurrent callers
    pub async fn refresh_shared(&self) -> Result<String> {
        let (success_opt, error_opt, _shared) = self
            .refresh_singleflight
            .work(REFRESH_KEY, async {
                match self.refresh_token().await {
                    Ok(access) => Ok(access),
                    Err(e) => {
                        let err_msg = e.to_string();
                        warn!(error = %err_msg, "Token refresh failed");
                        Err(err_msg)
                    }
                }
            })
            .await;

        match (success_opt, error_opt) {
            (Some(token), None) => Ok(token),
            (None, Some(err_str)) => Err(ClientError::Authentication(err_str)),
            _ => Err(ClientError::Authentication("Unknown error during token refresh".to_string())),
        }
    }

    /// True iff a valid access token and a cached user record are both stored
    pub fn is_authenticated(&self) -> bool {
        self.valid_access_token().is_some() && self.current_user().is_some()
    }

    /// Cached user record, without any validity check
    pub fn current_user(&self) -> Option<UserRecord> {
        let raw = self.storage.get(StorageSlot::User)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored user record is unreadable");
                None
            }
        }
    }

    /// Cached user object as raw JSON, including fields `UserRecord` doesn't model
    pub fn current_user_json(&self) -> Option<serde_json::Value> {
        let raw = self.storage.get(StorageSlot::User)?;
        serde_json::from_str(&raw).ok()
    }

    /// Replace the cached user record, e.g. after the profile was edited
    pub async fn update_current_user(&self, user: &UserRecord) -> Result<()> {
        let user_json = serde_json::to_string(user)?;
        let _guard = self.write_lock.lock().await;
        self.storage.set(StorageSlot::User, &user_json)
    }

    pub fn access_token(&self) -> Option<String> {
        self.storage.get(StorageSlot::AccessToken)
    }

    /// Stored access token, only if it has not expired
    pub fn valid_access_token(&self) -> Option<String> {
        self.access_token()
            .filter(|access| token::is_token_valid(Some(access.as_str())))
    }

    /// Decoded claims of the stored access token
    pub fn access_claims(&self) -> Option<TokenClaims> {
        self.access_token().as_deref().and_then(token::decode_claims)
    }

    pub fn is_token_expiring_soon(&self) -> bool {
        token::is_token_expiring_soon(self.access_token().as_deref(), self.config.refresh_before_expiry)
    }

    pub fn time_until_expiration(&self) -> Duration {
        token::time_until_expiration(self.access_token().as_deref())
    }

    /// True when the access token is expired or inside the refresh window and
    /// a refresh token is available to renew it
    pub fn needs_refresh(&self) -> bool {
        let Some(access) = self.access_token() else {
            return false;
        };
        self.storage.get(StorageSlot::RefreshToken).is_some()
            && token::time_until_expiration(Some(access.as_str())) <= self.config.refresh_before_expiry
    }

    /// Drop the local session and tell subscribers it expired
    pub async fn expire(&self) {
        self.clear().await;
        warn!("Session expired, credentials cleared");
        self.emit(SessionEvent::Expired);
    }

    async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    /// Start the optional auto-refresh task
    ///
    /// Every `refresh_check_interval` the task renews the access token if
    /// [`needs_refresh`](Self::needs_refresh) says so. A failed refresh expires
    /// the session. The task runs until the returned handle is aborted.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_refresh_task().await;
        })
    }

    async fn run_refresh_task(&self) {
        info!(
            check_interval_secs = self.config.refresh_check_interval.as_secs(),
            refresh_before_expiry_secs = self.config.refresh_before_expiry.as_secs(),
            "Started auto-refresh task"
        );

        let mut interval = tokio::time::interval(self.config.refresh_check_interval);

        loop {
            interval.tick().await;

            if !self.needs_refresh() {
                continue;
            }

            debug!(
                remaining_ms = self.time_until_expiration().as_millis() as u64,
                "Access token needs refresh"
            );

            match self.refresh_shared().await {
                Ok(_) => {
                    info!("Auto-refresh successful");
                }
                Err(e) => {
                    warn!(error = %e, "Auto-refresh failed");
                    self.expire().await;
                }
            }
        }
    }
}
