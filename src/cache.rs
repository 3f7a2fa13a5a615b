// src/cache.rs

use std::sync::Arc;

use tokio::sync::OnceCell;

use super::error::ServiceError;
use super::heartbeat::Heartbeat;
use super::model::{ArtifactLoader, LanguageModel, SuppressionSet, Tokenizer};

/// Tokenizer handle together with the suppression set derived from it.
#[derive(Clone)]
pub struct TokenizerResources {
    pub tokenizer: Arc<dyn Tokenizer>,
    pub suppression: Arc<SuppressionSet>,
}

/// Process-wide handles, loaded on first use and kept for the life of the
/// process.
pub struct ResourceCache {
    model_id: String,
    loader: Arc<dyn ArtifactLoader>,
    heartbeat: Arc<Heartbeat>,
    tokenizer: OnceCell<TokenizerResources>,
    model: OnceCell<Arc<dyn LanguageModel>>,
}

impl ResourceCache {
    pub fn new(
        model_id: impl Into<String>,
        loader: Arc<dyn ArtifactLoader>,
        heartbeat: Arc<Heartbeat>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            loader,
            heartbeat,
            tokenizer: OnceCell::new(),
            model: OnceCell::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn ensure_tokenizer(&self) -> Result<&TokenizerResources, ServiceError> {
        self.tokenizer
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let model_id = self.model_id.clone();
                let tokenizer = run_blocking("tokenizer", &self.model_id, move || {
                    loader.load_tokenizer(&model_id)
                })
                .await?;
                let suppression = Arc::new(SuppressionSet::from_tokenizer(tokenizer.as_ref()));
                tracing::info!(
                    model_id = %self.model_id,
                    suppressed = suppression.sequences().len(),
                    "Loaded tokenizer"
                );
                Ok::<_, ServiceError>(TokenizerResources {
                    tokenizer,
                    suppression,
                })
            })
            .await
    }

    pub async fn ensure_model(&self) -> Result<&Arc<dyn LanguageModel>, ServiceError> {
        self.model
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let model_id = self.model_id.clone();
                let model = run_blocking("model", &self.model_id, move || {
                    loader.load_model(&model_id)
                })
                .await?;
                tracing::info!(model_id = %self.model_id, "Loaded model");
                self.heartbeat.beat();
                Ok::<_, ServiceError>(model)
            })
            .await
    }
}

async fn run_blocking<T, F>(
    artifact: &'static str,
    model_id: &str,
    load: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(load)
        .await
        .map_err(|e| ServiceError::ResourceLoad {
            artifact,
            model_id: model_id.to_string(),
            reason: e.to_string(),
        })?
}
