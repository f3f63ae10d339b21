// Declare the modules
pub mod aggregator;
pub mod analysis;
pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod inventory;
pub mod models;
pub mod prompt;
pub mod router;
pub mod session;
pub mod state;

use crate::api::{GeminiProvider, GenerativeApiProvider};
use crate::config::AppConfig;
use crate::inventory::InventoryStore;
use crate::state::{AppState, AssistantEvent};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Wires configuration, the API provider and the seeded inventory into an [`AppState`].
pub fn build_state(config: AppConfig) -> Result<(AppState, UnboundedReceiver<AssistantEvent>)> {
    let api_key = config::get_api_key(&config)?;

    // Create the API provider instance
    let api_provider: Arc<dyn GenerativeApiProvider> = Arc::new(
        GeminiProvider::new(config.api_url.clone(), api_key, config.request_timeout)
            .context("Failed to create generative API client")?,
    );

    log::info!("Using generative API at {}", config.api_url);
    Ok(AppState::new(config, InventoryStore::seeded(), api_provider))
}
