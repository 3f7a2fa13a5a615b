// src/testing.rs
//
// In-process stand-ins for the artifact loader, the model and the heartbeat
// store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::TokenId;
use crate::error::{HeartbeatError, SampleError, ServiceError};
use crate::heartbeat::DocumentStore;
use crate::model::{ArtifactLoader, LanguageModel, SamplingConstraints, Tokenizer};

pub const EOS_ID: TokenId = 0;
pub const EOS_TEXT: &str = "</s>";

/// One token per character; id 0 is end-of-sequence.
#[derive(Debug, Clone, Default)]
pub struct CharTokenizer {
    unknown: Option<TokenId>,
    reserved: Vec<TokenId>,
}

impl CharTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unknown(mut self, id: TokenId) -> Self {
        self.unknown = Some(id);
        self
    }

    pub fn with_reserved(mut self, ids: Vec<TokenId>) -> Self {
        self.reserved = ids;
        self
    }
}

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, SampleError> {
        Ok(text.chars().map(|c| c as TokenId).collect())
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String, SampleError> {
        ids.iter()
            .map(|&id| {
                if id == EOS_ID {
                    return Ok(EOS_TEXT.to_string());
                }
                char::from_u32(id as u32)
                    .map(String::from)
                    .ok_or_else(|| SampleError::Detokenize(format!("no character for {id}")))
            })
            .collect()
    }

    fn eos_token(&self) -> &str {
        EOS_TEXT
    }

    fn unknown_token_id(&self) -> Option<TokenId> {
        self.unknown
    }

    fn reserved_token_ids(&self) -> Vec<TokenId> {
        self.reserved.clone()
    }
}

/// What the scripted model does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// Raw ids appended after the context.
    Ids(Vec<TokenId>),
    Fail(SampleError),
}

/// Replays a script, then repeats `fallback` forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    seen: Mutex<Vec<(usize, usize, TokenId)>>,
    suppressed: Mutex<Vec<Vec<Vec<TokenId>>>>,
}

impl ScriptedModel {
    pub fn always(step: Step) -> Self {
        Self::scripted(Vec::new(), step)
    }

    pub fn scripted(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            suppressed: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(context length, max_length, pad id)` for every call.
    pub fn seen(&self) -> Vec<(usize, usize, TokenId)> {
        self.seen.lock().unwrap().clone()
    }

    /// The suppressed sequences handed to every call.
    pub fn suppressed(&self) -> Vec<Vec<Vec<TokenId>>> {
        self.suppressed.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn eos_token_id(&self) -> TokenId {
        EOS_ID
    }

    fn sample(
        &self,
        context: &[TokenId],
        constraints: &SamplingConstraints<'_>,
    ) -> Result<Vec<TokenId>, SampleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            context.len(),
            constraints.max_length,
            constraints.pad_token_id,
        ));
        self.suppressed
            .lock()
            .unwrap()
            .push(constraints.suppressed.sequences().to_vec());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let mut out = context.to_vec();
        match step {
            Step::Reply(text) => {
                out.extend(text.chars().map(|c| c as TokenId));
                out.push(EOS_ID);
            }
            Step::Ids(ids) => out.extend(ids),
            Step::Fail(err) => return Err(err),
        }
        Ok(out)
    }
}

/// Counts loads and hands out shared stubs.
pub struct StubLoader {
    pub tokenizer: Arc<CharTokenizer>,
    pub model: Arc<ScriptedModel>,
    pub tokenizer_loads: AtomicUsize,
    pub model_loads: AtomicUsize,
    pub fail: bool,
}

impl StubLoader {
    pub fn new(model: ScriptedModel) -> Self {
        Self {
            tokenizer: Arc::new(CharTokenizer::new().with_unknown(1).with_reserved(vec![2])),
            model: Arc::new(model),
            tokenizer_loads: AtomicUsize::new(0),
            model_loads: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(ScriptedModel::always(Step::Reply("ok".into())))
        }
    }
}

impl ArtifactLoader for StubLoader {
    fn load_tokenizer(&self, model_id: &str) -> Result<Arc<dyn Tokenizer>, ServiceError> {
        self.tokenizer_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::ResourceLoad {
                artifact: "tokenizer",
                model_id: model_id.to_string(),
                reason: "stub failure".into(),
            });
        }
        Ok(self.tokenizer.clone())
    }

    fn load_model(&self, model_id: &str) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        self.model_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::ResourceLoad {
                artifact: "model",
                model_id: model_id.to_string(),
                reason: "stub failure".into(),
            });
        }
        Ok(self.model.clone())
    }
}

/// Keeps every timestamp written to it.
#[derive(Default)]
pub struct RecordingStore {
    pub writes: Mutex<Vec<(String, String, DateTime<Utc>)>>,
    pub fail: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn set_timestamp(
        &self,
        collection: &str,
        document: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HeartbeatError> {
        if self.fail {
            return Err(HeartbeatError::Project("unreachable".into()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((collection.to_string(), document.to_string(), now));
        Ok(())
    }
}
