// src/heartbeat.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::HeartbeatError;

/// Document store that can stamp a document with the current time.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Overwrites `collection/document` with `{"timestamp": now}`.
    async fn set_timestamp(
        &self,
        collection: &str,
        document: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HeartbeatError>;
}

/// Best-effort liveness signal. Failures are logged and dropped.
pub struct Heartbeat {
    store: Option<Arc<dyn DocumentStore>>,
    collection: String,
    document: String,
}

impl Heartbeat {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        document: impl Into<String>,
    ) -> Self {
        Self {
            store: Some(store),
            collection: collection.into(),
            document: document.into(),
        }
    }

    /// A recorder that never writes, for local runs.
    pub fn disabled() -> Self {
        Self {
            store: None,
            collection: String::new(),
            document: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Spawns the write on the current runtime and returns at once.
    pub fn beat(self: &Arc<Self>) {
        if !self.is_enabled() {
            return;
        }
        let this = Arc::clone(self);
        actix_web::rt::spawn(async move { this.record().await });
    }

    /// Writes the timestamp and waits for the store.
    pub async fn record(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store
            .set_timestamp(&self.collection, &self.document, Utc::now())
            .await
        {
            tracing::warn!(
                collection = %self.collection,
                document = %self.document,
                error = %e,
                "heartbeat write failed"
            );
        }
    }
}
