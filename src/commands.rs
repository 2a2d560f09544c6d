// Tauri commands exposed to the frontend

use crate::config;
use crate::conversations::Confirmation;
use crate::dispatcher::{DispatchPhase, SubmitOutcome, SUGGESTED_QUESTIONS};
use crate::downloads::DownloadKind;
use crate::models::{ActiveSession, BackendStatus, ChartKind, Conversation};
use crate::state::{AppState, RenderPlanSummary};
use tauri::{AppHandle, Emitter, Manager, State};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};
use tauri_plugin_opener::OpenerExt;
use tokio::sync::watch;
use uuid::Uuid;

fn parse_id(conversation_id: &str) -> Result<Uuid, String> {
    Uuid::parse_str(conversation_id).map_err(|_| {
        let err_msg = format!("Invalid conversation ID format: {}", conversation_id);
        log::error!("{}", err_msg);
        err_msg
    })
}

/// Relays dispatcher phase changes to the frontend as `dispatch_phase` events.
pub fn forward_phase_events(app_handle: AppHandle, mut phases: watch::Receiver<DispatchPhase>) {
    tauri::async_runtime::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            if let Err(e) = app_handle.emit("dispatch_phase", phase) {
                log::error!("Failed to emit dispatch phase {:?}: {:?}", phase, e);
            }
        }
    });
}

#[tauri::command]
pub async fn get_session(state: State<'_, AppState>) -> Result<ActiveSession, String> {
    Ok(state.snapshot().await)
}

#[tauri::command]
pub async fn list_suggestions() -> Result<Vec<String>, String> {
    Ok(SUGGESTED_QUESTIONS.iter().map(|q| q.to_string()).collect())
}

#[tauri::command]
pub async fn submit_question(
    state: State<'_, AppState>,
    question: String,
) -> Result<SubmitOutcome, String> {
    Ok(state.submit(&question).await)
}

#[tauri::command]
pub async fn submit_suggestion(
    state: State<'_, AppState>,
    index: usize,
) -> Result<SubmitOutcome, String> {
    Ok(state.submit_suggestion(index).await)
}

#[tauri::command]
pub async fn cancel_query(state: State<'_, AppState>) -> Result<bool, String> {
    log::warn!("Frontend requested to cancel the running query");
    Ok(state.cancel_query())
}

#[tauri::command]
pub async fn set_chart_type(
    state: State<'_, AppState>,
    index: usize,
    kind: ChartKind,
) -> Result<(), String> {
    state
        .set_chart_override(index, kind)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_render_plan(
    state: State<'_, AppState>,
    index: usize,
) -> Result<Option<RenderPlanSummary>, String> {
    Ok(state.render_plan_for(index).await)
}

#[tauri::command]
pub async fn save_conversation(state: State<'_, AppState>) -> Result<Option<Conversation>, String> {
    log::info!("Frontend requested to save the current conversation");
    Ok(state.save_current().await)
}

#[tauri::command]
pub async fn list_conversations(state: State<'_, AppState>) -> Result<Vec<Conversation>, String> {
    Ok(state.list_saved().await)
}

#[tauri::command]
pub async fn open_conversation(
    state: State<'_, AppState>,
    conversation_id: String,
) -> Result<ActiveSession, String> {
    let id = parse_id(&conversation_id)?;
    state
        .open_saved(id)
        .await
        .ok_or_else(|| format!("Conversation {} not found", conversation_id))
}

#[tauri::command]
pub async fn delete_conversation(
    state: State<'_, AppState>,
    conversation_id: String,
) -> Result<(), String> {
    log::warn!("Frontend requested to delete conversation ID: {}", conversation_id);
    let id = parse_id(&conversation_id)?;
    state.delete_saved(id).await;
    Ok(())
}

/// Asks the user before wiping the archive. Returns whether it was cleared.
#[tauri::command]
pub async fn clear_conversations(
    app_handle: AppHandle,
    state: State<'_, AppState>,
) -> Result<bool, String> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    app_handle
        .dialog()
        .message("Delete all saved conversations? This cannot be undone.")
        .title("Clear saved conversations")
        .kind(MessageDialogKind::Warning)
        .buttons(MessageDialogButtons::OkCancel)
        .show(move |confirmed| {
            let _ = tx.send(confirmed);
        });
    let confirmed = rx.await.unwrap_or(false);
    Ok(state.clear_saved(Confirmation::from(confirmed)).await)
}

#[tauri::command]
pub async fn new_chat(state: State<'_, AppState>) -> Result<ActiveSession, String> {
    Ok(state.new_chat().await)
}

#[tauri::command]
pub async fn backend_status(state: State<'_, AppState>) -> Result<BackendStatus, String> {
    state.backend_status().await.map_err(|e| {
        log::warn!("Backend status check failed: {}", e);
        e.to_string()
    })
}

/// Saves a PDF or CSV export into the user's download folder and reveals it.
#[tauri::command]
pub async fn download_export(
    app_handle: AppHandle,
    state: State<'_, AppState>,
    index: usize,
    kind: DownloadKind,
) -> Result<String, String> {
    let dir = app_handle
        .path()
        .download_dir()
        .map_err(|e| format!("Failed to resolve download folder: {}", e))?;
    let path = state
        .download(index, kind, &dir)
        .await
        .map_err(|e| e.to_string())?;
    if let Err(e) = app_handle.opener().reveal_item_in_dir(&path) {
        log::warn!("Failed to reveal {}: {:?}", path.display(), e);
    }
    Ok(path.to_string_lossy().into_owned())
}

/// Copies the SQL behind a bot answer to the clipboard.
#[tauri::command]
pub async fn copy_sql(
    app_handle: AppHandle,
    state: State<'_, AppState>,
    index: usize,
) -> Result<(), String> {
    let sql = {
        let session = state.session.lock().await;
        session
            .messages
            .get(index)
            .and_then(|m| m.data.as_ref())
            .map(|data| data.sql.clone())
            .ok_or_else(|| format!("Message {} has no SQL", index))?
    };
    app_handle
        .clipboard()
        .write_text(sql)
        .map_err(|e| format!("Failed to copy SQL: {}", e))
}

#[tauri::command]
pub async fn set_api_key(api_key: String) -> Result<(), String> {
    if api_key.trim().is_empty() {
        return Err("API key cannot be empty.".to_string());
    }
    config::set_api_key_in_keyring(api_key.trim()).map_err(|e| format!("{:#}", e))
}
