use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One row of a query result, column name to scalar value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Per-message chart overrides, keyed by the message's index in the session.
pub type ChartOverrides = BTreeMap<usize, ChartKind>;

pub const WELCOME_MESSAGE: &str = "Hello! I'm your finance analytics assistant. \
Ask me anything about your financial data, like revenue trends, expenses by category or top customers.";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
    Error,
}

// The backend also proposes "scatter"; anything we can't draw falls back to a table.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    #[serde(other)]
    Table,
}

/// Server-supplied visualization hint.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChartSpec {
    #[serde(default)]
    pub chart: Option<ChartKind>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The backend's structured answer to a question.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    #[serde(default)]
    pub insights: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub data: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_spec: Option<ChartSpec>,
    #[serde(default)]
    pub row_count: usize,
}

/// A single entry in a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryResult>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), None)
    }

    /// Bot answer: the insights become the display text, the full result rides along.
    pub fn bot(result: QueryResult) -> Self {
        Self::new(Role::Bot, result.insights.clone(), Some(result))
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content.into(), None)
    }

    pub fn welcome() -> Self {
        Self::new(Role::Bot, WELCOME_MESSAGE.to_string(), None)
    }

    fn new(role: Role, content: String, data: Option<QueryResult>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// The live, auto-persisted chat.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActiveSession {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub chart_type_overrides: ChartOverrides,
    #[serde(rename = "lastUpdated", default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl ActiveSession {
    /// A fresh session holding only the welcome message.
    pub fn new() -> Self {
        Self {
            messages: vec![Message::welcome()],
            chart_type_overrides: ChartOverrides::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn is_greeting_only(&self) -> bool {
        self.messages.len() <= 1
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.last_updated = Utc::now();
    }
}

impl Default for ActiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&Conversation> for ActiveSession {
    fn from(conversation: &Conversation) -> Self {
        Self {
            messages: conversation.messages.clone(),
            chart_type_overrides: conversation.chart_type_overrides.clone(),
            last_updated: Utc::now(),
        }
    }
}

/// A saved snapshot of a chat. Never mutated once archived.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub chart_type_overrides: ChartOverrides,
    pub saved_at: DateTime<Utc>,
}

/// Reply of `GET /api/status`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BackendStatus {
    pub db_status: String,
    pub ai_status: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub total_rows: u64,
}

impl BackendStatus {
    pub fn db_connected(&self) -> bool {
        self.db_status == "connected"
    }

    pub fn ai_active(&self) -> bool {
        self.ai_status == "active"
    }
}
