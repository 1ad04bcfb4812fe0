mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use keepmd_core::auth::{CredentialExchange, GpsOAuthClient};
use keepmd_core::storage::{KeyringSecretStore, SecretStore};
use keepmd_core::sync::KeepSyncBackend;
use keepmd_core::{BridgeStorage, KeepClient, TokenStorage};
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keepmd_bridge=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting keepmd-bridge with config: {:?}", config);

    let secrets: Option<Arc<dyn SecretStore>> = match config.token_storage {
        TokenStorage::Keyring => Some(Arc::new(KeyringSecretStore::default())),
        TokenStorage::File => None,
    };
    let storage = BridgeStorage::new(config.state_path.clone(), secrets);
    let exchange: Arc<dyn CredentialExchange> =
        Arc::new(GpsOAuthClient::new(config.auth_url.clone())?);
    let backend = Arc::new(KeepSyncBackend::new(
        exchange.clone(),
        config.notes_api_url.clone(),
    )?);
    let client = Arc::new(KeepClient::open(storage, exchange, backend).await?);
    tracing::info!(
        device_id = client.device_id(),
        logged_in = client.logged_in(),
        "Keep client ready"
    );

    let state = AppState::new(config, client);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("keepmd-bridge listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
