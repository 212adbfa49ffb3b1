//! Session walkthrough against a running backend
//!
//! Usage:
//!   ABATTOIR_API_URL=http://localhost:8000 ABATTOIR_USERNAME=admin ABATTOIR_PASSWORD=... \
//!     cargo run --example session_demo

use abattoir_rs_client::{ApiClient, ClientConfig, FileStorage, MemoryStorage, SessionEvent, SessionManager, SessionStorage};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Configuration
    let config = ClientConfig::from_env();
    let username = std::env::var("ABATTOIR_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let password = std::env::var("ABATTOIR_PASSWORD").unwrap_or_default();

    println!("=== Abattoir Session Demo ===");
    println!("Backend: {}", config.base_url);
    println!();

    let storage: Arc<dyn SessionStorage> = match &config.storage_path {
        Some(path) => Arc::new(FileStorage::open(path)?),
        None => Arc::new(MemoryStorage::new()),
    };

    let session = SessionManager::new(config, storage)?;
    let api = ApiClient::new(Arc::clone(&session));

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event == SessionEvent::Expired {
                println!("! Session expired, back to the login screen");
            }
        }
    });

    if session.is_authenticated() {
        println!("✓ Restored session from storage");
    } else {
        let user = match session.login(&username, &password).await {
            Ok(user) => user,
            Err(e) => {
                println!("! Login failed: {e}");
                return Ok(());
            }
        };
        println!("✓ Logged in as {} ({})", user.full_name(), user.username);
    }

    println!(
        "  Access token expires in {}s",
        session.time_until_expiration().as_secs()
    );
    println!();

    let refresher = session.spawn_auto_refresh();

    println!("Fetching users...");
    match api.get_json::<serde_json::Value>("/api/users/").await {
        Ok(users) => println!("✓ {}", serde_json::to_string_pretty(&users)?),
        Err(e) => println!("! Request failed: {e}"),
    }
    println!();

    refresher.abort();
    session.logout().await;
    println!("✓ Logged out");

    Ok(())
}
