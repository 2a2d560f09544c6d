//! Query dispatch: `Idle -> Sending -> {Succeeded, Failed} -> Idle`.
//!
//! The user's question is appended before the backend is contacted, and the
//! answer (or the failure text) is appended once the call settles. Only one
//! query is in flight at a time: a submission that arrives while busy,
//! whatever button triggered it, is rejected and changes nothing.

use crate::api::ApiError;
use crate::models::Message;
use crate::state::AppState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// Example questions offered on an empty chat.
pub const SUGGESTED_QUESTIONS: &[&str] = &[
    "What were the total sales this year?",
    "Show monthly revenue trends",
    "What are the top 5 expense categories?",
    "Compare revenue vs expenses by quarter",
    "Which customers generated the most revenue?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    Idle,
    Sending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Blank question; nothing happened.
    Skipped,
    /// Another query is in flight; nothing happened.
    Busy,
    Answered(Message),
    Failed(Message),
    /// The chat was replaced while the query ran; its result was dropped.
    Discarded,
}

/// Holds the busy flag for one query and releases it however the query ends.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    phase: &'a watch::Sender<DispatchPhase>,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a AtomicBool, phase: &'a watch::Sender<DispatchPhase>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        phase.send_replace(DispatchPhase::Sending);
        Some(Self { busy, phase })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(DispatchPhase::Idle);
        self.busy.store(false, Ordering::Release);
    }
}

/// Removes the in-flight registration when the query settles.
struct InFlight<'a> {
    registry: &'a dashmap::DashMap<Uuid, Arc<Notify>>,
    id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

impl AppState {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> DispatchPhase {
        *self.phase.borrow()
    }

    /// Watch dispatch phase changes, e.g. to drive a loading indicator.
    pub fn subscribe_phase(&self) -> watch::Receiver<DispatchPhase> {
        self.phase.subscribe()
    }

    /// Sends `question` to the backend and records the exchange in the active session.
    pub async fn submit(&self, question: &str) -> SubmitOutcome {
        let question = question.trim();
        if question.is_empty() {
            log::debug!("Ignoring blank question");
            return SubmitOutcome::Skipped;
        }

        let Some(_busy) = BusyGuard::acquire(&self.busy, &self.phase) else {
            log::warn!("Rejecting question while another query is in flight");
            return SubmitOutcome::Busy;
        };

        // Registered before the first await so a cancel can always reach it.
        let request_id = Uuid::new_v4();
        let cancel = Arc::new(Notify::new());
        self.in_flight.insert(request_id, cancel.clone());
        let _registration = InFlight {
            registry: &self.in_flight,
            id: request_id,
        };

        let Some(generation) = self.append(Message::user(question), None).await else {
            return SubmitOutcome::Discarded;
        };

        log::info!("Query {} sent: {}", request_id, question);
        let timeout = self.config.query_timeout;
        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, self.api.query(question)) => {
                outcome.unwrap_or(Err(ApiError::Timeout(timeout)))
            }
            _ = cancel.notified() => Err(ApiError::Cancelled),
        };

        match result {
            Ok(answer) => {
                self.phase.send_replace(DispatchPhase::Succeeded);
                log::info!("Query {} succeeded with {} rows", request_id, answer.row_count);
                let message = Message::bot(answer);
                if self.append(message.clone(), Some(generation)).await.is_none() {
                    return SubmitOutcome::Discarded;
                }
                SubmitOutcome::Answered(message)
            }
            Err(e) => {
                self.phase.send_replace(DispatchPhase::Failed);
                if e.is_network_failure() {
                    log::error!("Query {} failed to reach the backend: {}", request_id, e);
                } else {
                    log::error!("Query {} rejected by the backend: {}", request_id, e);
                }
                let message = Message::error(e.to_string());
                if self.append(message.clone(), Some(generation)).await.is_none() {
                    return SubmitOutcome::Discarded;
                }
                SubmitOutcome::Failed(message)
            }
        }
    }

    /// Submits one of [`SUGGESTED_QUESTIONS`]. Same busy rule as [`AppState::submit`].
    pub async fn submit_suggestion(&self, index: usize) -> SubmitOutcome {
        match SUGGESTED_QUESTIONS.get(index) {
            Some(question) => self.submit(question).await,
            None => {
                log::warn!("Unknown suggestion index {}", index);
                SubmitOutcome::Skipped
            }
        }
    }

    /// Aborts the in-flight query, if any. Returns whether one was signalled.
    pub fn cancel_query(&self) -> bool {
        let mut signalled = false;
        for entry in self.in_flight.iter() {
            log::warn!("Cancelling query {}", entry.key());
            entry.value().notify_one();
            signalled = true;
        }
        signalled
    }

    /// Appends to the active session and persists it. With `expected`, the
    /// message is dropped if the session was replaced since that generation.
    /// Returns the generation the message landed in.
    async fn append(&self, message: Message, expected: Option<u64>) -> Option<u64> {
        let mut session = self.session.lock().await;
        let current = self.generation.load(Ordering::Acquire);
        if expected.is_some_and(|g| g != current) {
            log::warn!("Dropping {:?} message for a session that is no longer active", message.role);
            return None;
        }
        session.push(message);
        self.storage.lock().await.persist_active_session(&session).await;
        Some(current)
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
