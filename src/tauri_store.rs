//! Desktop backend for the persistence port, on `tauri-plugin-store`.

use crate::storage::KeyValueStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tauri::{AppHandle, Wry};
use tauri_plugin_store::{Store, StoreExt};

const STORE_FILE: &str = "nsight.json";

pub struct TauriStore {
    store: Arc<Store<Wry>>,
}

impl TauriStore {
    pub fn open(app: &AppHandle) -> Result<Self> {
        let store = app
            .store(STORE_FILE)
            .context("Failed to open desktop store")?;
        Ok(Self { store })
    }

    fn flush(&self) -> Result<()> {
        self.store.save().context("Failed to write desktop store to disk")
    }
}

#[async_trait]
impl KeyValueStore for TauriStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(match self.store.get(key) {
            None => None,
            Some(Value::String(raw)) => Some(raw),
            // Written by something other than us; hand back its JSON text.
            Some(other) => Some(other.to_string()),
        })
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.store.set(key, value);
        self.flush()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.store.delete(key) {
            self.flush()?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear();
        self.flush()
    }
}
