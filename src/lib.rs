//! Abattoir Rust Client
//!
//! Session management for the abattoir logistics admin API: JWT login and
//! logout, token storage, expiry checks, single-flight token refresh and an
//! HTTP client that attaches and renews credentials transparently.

pub mod api_client;
pub mod config;
pub mod error;
pub mod session;
pub mod token;
pub mod token_store;
pub mod types;

pub use api_client::ApiClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use session::{SessionEvent, SessionManager};
pub use token::TokenClaims;
pub use token_store::{FileStorage, MemoryStorage, NoopStorage, SessionStorage, StorageSlot};
pub use types::UserRecord;
