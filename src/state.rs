use crate::api::{ApiError, FinanceApi};
use crate::config::ClientConfig;
use crate::conversations::{Confirmation, ConversationStore};
use crate::dispatcher::DispatchPhase;
use crate::models::{ActiveSession, BackendStatus, ChartKind, Conversation, Role};
use crate::render::{self, RenderPlan};
use crate::storage::KeyValueStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use uuid::Uuid;

/// Why a chart override was refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("No message at index {0}")]
    NoSuchMessage(usize),
    #[error("Message {0} has no data to chart")]
    NoData(usize),
}

/// Application state owned by the host. All mutation goes through its methods.
///
/// Lock order: `session` before `storage`, never the reverse.
#[derive(Clone)]
pub struct AppState {
    pub config: ClientConfig,
    pub storage: Arc<Mutex<ConversationStore>>,
    pub session: Arc<Mutex<ActiveSession>>,
    pub api: Arc<dyn FinanceApi>,
    pub(crate) busy: Arc<AtomicBool>,
    pub(crate) phase: Arc<watch::Sender<DispatchPhase>>,
    pub(crate) in_flight: Arc<DashMap<Uuid, Arc<Notify>>>,
    /// Bumped whenever the active session is replaced. Only changed under the `session` lock.
    pub(crate) generation: Arc<AtomicU64>,
}

impl AppState {
    /// Restores the persisted session (or starts a greeting session).
    pub async fn new(
        config: ClientConfig,
        backend: Arc<dyn KeyValueStore>,
        api: Arc<dyn FinanceApi>,
    ) -> Self {
        let store = ConversationStore::new(backend);
        let session = store.load_active_session().await;
        let (phase, _) = watch::channel(DispatchPhase::Idle);
        Self {
            config,
            storage: Arc::new(Mutex::new(store)),
            session: Arc::new(Mutex::new(session)),
            api,
            busy: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(phase),
            in_flight: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn snapshot(&self) -> ActiveSession {
        self.session.lock().await.clone()
    }

    pub async fn backend_status(&self) -> Result<BackendStatus, ApiError> {
        self.api.status().await
    }

    /// Sets the chart kind for one bot answer and persists the session.
    pub async fn set_chart_override(&self, index: usize, kind: ChartKind) -> Result<(), OverrideError> {
        let mut session = self.session.lock().await;
        let message = session
            .messages
            .get(index)
            .ok_or(OverrideError::NoSuchMessage(index))?;
        if message.role != Role::Bot || message.data.is_none() {
            return Err(OverrideError::NoData(index));
        }
        session.chart_type_overrides.insert(index, kind);
        session.last_updated = chrono::Utc::now();
        log::debug!("Chart override for message {} set to {:?}", index, kind);
        self.storage.lock().await.persist_active_session(&session).await;
        Ok(())
    }

    /// Render plan for the message at `index`, if it carries data.
    pub async fn render_plan_for(&self, index: usize) -> Option<RenderPlanSummary> {
        let session = self.session.lock().await;
        let result = session.messages.get(index)?.data.as_ref()?;
        let plan = render::render_plan(index, result, &session.chart_type_overrides);
        Some(RenderPlanSummary::from(&plan))
    }

    pub async fn save_current(&self) -> Option<Conversation> {
        let session = self.session.lock().await;
        self.storage.lock().await.save_conversation(&session).await
    }

    pub async fn list_saved(&self) -> Vec<Conversation> {
        self.storage.lock().await.list_archive().await
    }

    /// Replaces the active session with a copy of a saved conversation.
    pub async fn open_saved(&self, id: Uuid) -> Option<ActiveSession> {
        let mut session = self.session.lock().await;
        let opened = self.storage.lock().await.open_conversation(id).await?;
        self.replace_session(&mut session, opened.clone());
        log::info!("Opened saved conversation {}", id);
        Some(opened)
    }

    pub async fn delete_saved(&self, id: Uuid) {
        self.storage.lock().await.delete_conversation(id).await;
    }

    pub async fn clear_saved(&self, confirmation: Confirmation) -> bool {
        self.storage.lock().await.clear_archive(confirmation).await
    }

    /// Starts a new chat.
    pub async fn new_chat(&self) -> ActiveSession {
        let mut session = self.session.lock().await;
        let fresh = self.storage.lock().await.reset_active_session().await;
        self.replace_session(&mut session, fresh.clone());
        fresh
    }

    /// Swaps in another session. A query still running belongs to the old one,
    /// so it is cancelled and its late result is dropped.
    fn replace_session(&self, session: &mut ActiveSession, next: ActiveSession) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if self.cancel_query() {
            log::warn!("Active session replaced while a query was in flight");
        }
        *session = next;
    }
}

/// Owned copy of a [`RenderPlan`], for handing across the command boundary.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RenderPlanSummary {
    pub kind: ChartKind,
    pub x: Option<String>,
    pub y: Option<String>,
    pub title: Option<String>,
    pub rows: Vec<crate::models::Row>,
}

impl From<&RenderPlan<'_>> for RenderPlanSummary {
    fn from(plan: &RenderPlan<'_>) -> Self {
        Self {
            kind: plan.kind,
            x: plan.x.clone(),
            y: plan.y.clone(),
            title: plan.title.map(str::to_string),
            rows: plan.rows.to_vec(),
        }
    }
}
