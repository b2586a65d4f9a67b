// src/main.rs

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Module Declarations ---
mod config;
mod content;
mod error;
mod game;
mod limiter;
mod registry;
mod state;
mod web;

// --- Imports ---
use crate::config::load_settings;
use crate::content::WordCatalog;
use crate::error::Result as AppResult;
use crate::registry::RoomManagerHandle;
use crate::state::AppState;
use crate::web::run_server;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Setup tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load Configuration
    let app_settings = Arc::new(load_settings()?);
    tracing::info!(
        rooms.max = app_settings.rooms.max_rooms,
        rooms.max_players = app_settings.rooms.max_players,
        "Configuration loaded"
    );

    // Initialize the word catalog
    let catalog = Arc::new(WordCatalog::new(app_settings.content.clone()).await?);
    tracing::info!(
        categories = ?catalog.category_names().await,
        "Word catalog ready"
    );

    // Initialize the Room Registry
    let room_manager =
        RoomManagerHandle::spawn(32, app_settings.rooms.clone(), Arc::clone(&catalog));

    // Create AppState
    let app_state = AppState {
        rooms: room_manager,
        catalog,
        settings: Arc::clone(&app_settings),
    };

    // Run the web server
    run_server(app_state, &app_settings.server).await?;

    Ok(())
}
