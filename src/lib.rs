// Declare the modules
pub mod api;
pub mod config;
pub mod conversations;
pub mod dispatcher;
pub mod downloads;
pub mod models;
pub mod render;
pub mod state;
pub mod storage;

#[cfg(feature = "desktop")]
pub mod commands;
#[cfg(feature = "desktop")]
mod tauri_store;

#[cfg(test)]
mod testing;

use anyhow::Context;
use api::HttpFinanceApi;
use config::ClientConfig;
use state::AppState;
use std::sync::Arc;
use storage::{KeyValueStore, SqliteStore};

/// Wires the HTTP backend client and the given store into an [`AppState`].
pub async fn bootstrap(
    config: ClientConfig,
    backend: Arc<dyn KeyValueStore>,
) -> anyhow::Result<AppState> {
    let api_key = config.api_key().context("Failed to resolve backend API key")?;
    let api = HttpFinanceApi::new(&config, api_key).context("Failed to create backend client")?;
    log::info!("Using finance backend at {}", config.api_url);
    Ok(AppState::new(config, backend, Arc::new(api)).await)
}

/// [`bootstrap`] on SQLite: the configured file, or a throwaway in-memory database.
pub async fn bootstrap_sqlite(config: ClientConfig) -> anyhow::Result<AppState> {
    let store = match &config.db_path {
        Some(path) => SqliteStore::open(path).await?,
        None => {
            log::warn!("No database path configured, conversations will not outlive this process");
            SqliteStore::in_memory().await?
        }
    };
    bootstrap(config, Arc::new(store)).await
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    // Initialize logging
    env_logger::init();

    tauri::Builder::default()
        .plugin(tauri_plugin_store::Builder::default().build())
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_clipboard_manager::init())
        .setup(|app| {
            let config = ClientConfig::from_env()?;
            let store = tauri_store::TauriStore::open(app.handle())?;

            // setup is synchronous; block once for the initial session load.
            let app_state =
                tauri::async_runtime::block_on(async { bootstrap(config, Arc::new(store)).await })?;

            commands::forward_phase_events(app.handle().clone(), app_state.subscribe_phase());
            app.manage(app_state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_session,
            commands::list_suggestions,
            commands::submit_question,
            commands::submit_suggestion,
            commands::cancel_query,
            commands::set_chart_type,
            commands::get_render_plan,
            commands::save_conversation,
            commands::list_conversations,
            commands::open_conversation,
            commands::delete_conversation,
            commands::clear_conversations,
            commands::new_chat,
            commands::backend_status,
            commands::download_export,
            commands::copy_sql,
            commands::set_api_key,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
