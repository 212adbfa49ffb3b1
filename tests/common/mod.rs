//! In-process mock of the admin backend used by the integration tests

#![allow(dead_code)]

use abattoir_rs_client::{ClientConfig, SessionManager, SessionStorage, UserRecord};
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

static TOKEN_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Serialize)]
struct Claims {
    user_id: i64,
    username: String,
    user_type: String,
    abattoir: i64,
    is_superuser: bool,
    token_type: String,
    jti: String,
    iat: i64,
    exp: i64,
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Mint a signed token expiring `expires_in_secs` from now (negative for expired)
pub fn mint_token(token_type: &str, expires_in_secs: i64) -> String {
    let now = now_secs();
    let claims = Claims {
        user_id: 1,
        username: USERNAME.to_string(),
        user_type: "admin".to_string(),
        abattoir: 3,
        is_superuser: true,
        token_type: token_type.to_string(),
        jti: format!("jti-{}", TOKEN_COUNTER.fetch_add(1, Ordering::SeqCst)),
        iat: now,
        exp: now + expires_in_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"mock-backend-secret"),
    )
    .unwrap()
}

pub fn user_json() -> Value {
    json!({
        "id": 1,
        "username": USERNAME,
        "email": "admin@abattoir.example",
        "first_name": "Amina",
        "last_name": "Belkacem",
        "user_type": "admin",
        "abattoir": 3,
        "is_active": true,
        "is_superuser": true,
        "created_at": "2024-03-01T08:00:00Z",
        "updated_at": "2024-06-11T14:30:00Z",
        "phone_number": "+213555000111"
    })
}

pub fn expected_user() -> UserRecord {
    serde_json::from_value(user_json()).unwrap()
}

pub struct MockState {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub animal_calls: AtomicUsize,
    /// The only access token protected routes accept
    pub accepted_access: Mutex<Option<String>>,
    pub access_ttl_secs: AtomicI64,
    pub logout_status: AtomicU16,
    pub refresh_fails: AtomicBool,
    pub refresh_delay_ms: AtomicU64,
    /// When set, rejected requests wait here before answering 401
    pub unauthorized_barrier: Mutex<Option<Arc<Barrier>>>,
    /// Authorization header of every protected request, in arrival order
    pub seen_authorization: Mutex<Vec<Option<String>>>,
    /// User object returned by the login endpoint
    pub login_user: Mutex<Value>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            animal_calls: AtomicUsize::new(0),
            accepted_access: Mutex::new(None),
            access_ttl_secs: AtomicI64::new(15 * 60),
            logout_status: AtomicU16::new(200),
            refresh_fails: AtomicBool::new(false),
            refresh_delay_ms: AtomicU64::new(0),
            unauthorized_barrier: Mutex::new(None),
            seen_authorization: Mutex::new(Vec::new()),
            login_user: Mutex::new(user_json()),
        }
    }
}

impl MockState {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn animal_calls(&self) -> usize {
        self.animal_calls.load(Ordering::SeqCst)
    }

    pub fn seen_authorization(&self) -> Vec<Option<String>> {
        self.seen_authorization.lock().unwrap().clone()
    }

    fn issue_access(&self) -> String {
        let access = mint_token("access", self.access_ttl_secs.load(Ordering::SeqCst));
        *self.accepted_access.lock().unwrap() = Some(access.clone());
        access
    }

    /// Record the request and tell whether it carries the accepted token
    fn authorize(&self, headers: &HeaderMap) -> bool {
        let auth = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen_authorization.lock().unwrap().push(auth.clone());

        let accepted = self.accepted_access.lock().unwrap().clone();
        matches!((auth, accepted), (Some(auth), Some(token)) if auth == format!("Bearer {token}"))
    }

    async fn reject(&self) -> (StatusCode, Json<Value>) {
        let barrier = self.unauthorized_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Given token not valid for any token type", "code": "token_not_valid"})),
        )
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    /// Start a mock backend on a random port
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let app = Router::new()
            .route("/api/users/auth/login/", post(login))
            .route("/api/users/auth/refresh/", post(refresh))
            .route("/api/users/logout/", post(logout))
            .route("/api/animals/", get(list_animals).post(create_animal))
            .route("/api/always-unauthorized/", get(always_unauthorized))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self { addr, state, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting the current access token, as after a server-side revocation
    pub fn revoke_access(&self) {
        *self.state.accepted_access.lock().unwrap() = None;
    }

    pub fn session(&self, storage: Arc<dyn SessionStorage>) -> Arc<SessionManager> {
        let config = ClientConfig::new(self.base_url()).with_timeout(Duration::from_secs(5));
        SessionManager::new(config, storage).unwrap()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Base URL of a port nothing listens on
pub async fn unreachable_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.login_calls.fetch_add(1, Ordering::SeqCst);

    if body["username"] != USERNAME || body["password"] != PASSWORD {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "Invalid credentials"})));
    }

    let access = state.issue_access();
    let refresh = mint_token("refresh", 24 * 60 * 60);
    let user = state.login_user.lock().unwrap().clone();
    (
        StatusCode::OK,
        Json(json!({"access": access, "refresh": refresh, "user": user})),
    )
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if state.refresh_fails.load(Ordering::SeqCst) || !body["refresh"].is_string() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        );
    }

    (StatusCode::OK, Json(json!({"access": state.issue_access()})))
}

async fn logout(State(state): State<Arc<MockState>>) -> (StatusCode, Json<Value>) {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.logout_status.load(Ordering::SeqCst)).unwrap();
    (status, Json(json!({})))
}

async fn list_animals(State(state): State<Arc<MockState>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.animal_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorize(&headers) {
        return state.reject().await;
    }

    (
        StatusCode::OK,
        Json(json!([
            {"id": 1, "tag": "DZ-0001", "species": "bovine", "status": "in_transit"},
            {"id": 2, "tag": "DZ-0002", "species": "ovine", "status": "received"}
        ])),
    )
}

async fn create_animal(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.animal_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorize(&headers) {
        return state.reject().await;
    }

    (StatusCode::CREATED, Json(json!({"id": 3, "tag": body["tag"]})))
}

async fn always_unauthorized(State(state): State<Arc<MockState>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.animal_calls.fetch_add(1, Ordering::SeqCst);
    state.authorize(&headers);
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "You do not have access to this abattoir"})),
    )
}
