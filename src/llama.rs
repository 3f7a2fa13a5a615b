// src/llama.rs
//
// Tokenizer and model contracts backed by a single GGUF artifact.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel, Special},
    token::LlamaToken,
    token_type::LlamaTokenAttr,
};
use rand::Rng;

use super::api::TokenId;
use super::error::{SampleError, ServiceError};
use super::model::{ArtifactLoader, LanguageModel, SamplingConstraints, Tokenizer};

const TOP_K: usize = 50;
const TEMPERATURE: f32 = 1.0;

/* ---------- Shared artifact ---------- */

struct LlamaArtifact {
    backend: Arc<LlamaBackend>,
    model: LlamaModel,
    n_ctx: u32,
}

/// Loads the GGUF at the model identifier path once and hands out tokenizer
/// and model views over it.
pub struct LlamaLoader {
    backend: Arc<LlamaBackend>,
    n_ctx: u32,
    n_gpu_layers: u32,
    artifact: Mutex<Option<Arc<LlamaArtifact>>>,
}

impl LlamaLoader {
    /// `n_ctx` must cover the context window plus the reply budget.
    pub fn new(n_ctx: u32, n_gpu_layers: u32) -> Result<Self, llama_cpp_2::LLamaCppError> {
        let backend = Arc::new(LlamaBackend::init()?);
        Ok(Self {
            backend,
            n_ctx,
            n_gpu_layers,
            artifact: Mutex::new(None),
        })
    }

    fn artifact(&self, artifact: &'static str, model_id: &str) -> Result<Arc<LlamaArtifact>, ServiceError> {
        let load_error = |reason: String| ServiceError::ResourceLoad {
            artifact,
            model_id: model_id.to_string(),
            reason,
        };
        let mut slot = self
            .artifact
            .lock()
            .map_err(|_| load_error("artifact lock poisoned".into()))?;
        if let Some(loaded) = slot.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let model_params = LlamaModelParams::default().with_n_gpu_layers(self.n_gpu_layers);
        let model = LlamaModel::load_from_file(&self.backend, model_id, &model_params)
            .map_err(|e| load_error(e.to_string()))?;
        tracing::info!(model_id, n_vocab = model.n_vocab(), "Read GGUF artifact");

        let loaded = Arc::new(LlamaArtifact {
            backend: Arc::clone(&self.backend),
            model,
            n_ctx: self.n_ctx,
        });
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

impl ArtifactLoader for LlamaLoader {
    fn load_tokenizer(&self, model_id: &str) -> Result<Arc<dyn Tokenizer>, ServiceError> {
        let artifact = self.artifact("tokenizer", model_id)?;
        Ok(Arc::new(LlamaTokenizer::new(artifact)))
    }

    fn load_model(&self, model_id: &str) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        let artifact = self.artifact("model", model_id)?;
        Ok(Arc::new(LlamaGenerator { artifact }))
    }
}

/* ---------- Tokenizer ---------- */

pub struct LlamaTokenizer {
    artifact: Arc<LlamaArtifact>,
    eos_text: String,
    unknown: Option<TokenId>,
    reserved: Vec<TokenId>,
}

impl LlamaTokenizer {
    fn new(artifact: Arc<LlamaArtifact>) -> Self {
        let model = &artifact.model;
        let eos = model.token_eos();
        let eos_text = model
            .token_to_bytes(eos, Special::Tokenize)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        let mut unknown = None;
        let mut reserved = Vec::new();
        for id in 0..model.n_vocab() {
            let token = LlamaToken::new(id);
            let attrs = model.token_attr(token);
            if attrs.contains(LlamaTokenAttr::Unknown) {
                unknown.get_or_insert(id);
            } else if attrs.contains(LlamaTokenAttr::Control) && token != eos {
                reserved.push(id);
            }
        }

        Self {
            eos_text,
            unknown,
            reserved,
            artifact,
        }
    }
}

impl Tokenizer for LlamaTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, SampleError> {
        let tokens = self
            .artifact
            .model
            .str_to_token(text, AddBos::Never)
            .map_err(|e| SampleError::Tokenize(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String, SampleError> {
        let mut bytes = Vec::new();
        for &id in ids {
            let piece = self
                .artifact
                .model
                .token_to_bytes(LlamaToken::new(id), Special::Tokenize)
                .map_err(|e| SampleError::Detokenize(e.to_string()))?;
            bytes.extend_from_slice(&piece);
        }
        String::from_utf8(bytes).map_err(|e| SampleError::Detokenize(e.to_string()))
    }

    fn eos_token(&self) -> &str {
        &self.eos_text
    }

    fn unknown_token_id(&self) -> Option<TokenId> {
        self.unknown
    }

    fn reserved_token_ids(&self) -> Vec<TokenId> {
        self.reserved.clone()
    }
}

/* ---------- Model ---------- */

pub struct LlamaGenerator {
    artifact: Arc<LlamaArtifact>,
}

impl LanguageModel for LlamaGenerator {
    fn eos_token_id(&self) -> TokenId {
        self.artifact.model.token_eos().0
    }

    fn sample(
        &self,
        context: &[TokenId],
        constraints: &SamplingConstraints<'_>,
    ) -> Result<Vec<TokenId>, SampleError> {
        if context.is_empty() {
            return Err(SampleError::EmptyContext);
        }
        let artifact = &self.artifact;
        let model = &artifact.model;

        // 1. Fresh context per sample
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(artifact.n_ctx))
            .with_n_batch(artifact.n_ctx);
        let mut ctx = model
            .new_context(&artifact.backend, ctx_params)
            .map_err(|e| SampleError::Context(e.to_string()))?;

        // 2. Feed the prompt
        let mut batch = LlamaBatch::new(context.len(), 1);
        let last_idx = context.len() as i32 - 1;
        for (i, &t) in (0_i32..).zip(context.iter()) {
            batch
                .add(LlamaToken::new(t), i, &[0], i == last_idx)
                .map_err(|e| SampleError::Decode(e.to_string()))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| SampleError::Decode(e.to_string()))?;

        // 3. Sample until end-of-sequence or the length cap. A single
        //    sequence never needs padding, so `pad_token_id` goes unused.
        let eos = model.token_eos().0;
        let mut out = context.to_vec();
        let mut pos = batch.n_tokens();
        let mut rng = rand::thread_rng();
        while out.len() < constraints.max_length {
            let banned: Vec<TokenId> = constraints.suppressed.banned_next(&out).collect();
            let next = sample_top_k(ctx.get_logits(), &banned, TEMPERATURE, TOP_K, &mut rng)
                .ok_or_else(|| SampleError::Decode("every candidate token is suppressed".into()))?;
            out.push(next);
            if next == eos {
                break;
            }

            batch.clear();
            batch
                .add(LlamaToken::new(next), pos, &[0], true)
                .map_err(|e| SampleError::Decode(e.to_string()))?;
            ctx.decode(&mut batch)
                .map_err(|e| SampleError::Decode(e.to_string()))?;
            pos += 1;
        }
        Ok(out)
    }
}

/// Top-k sampling with temperature over the logits that are not banned.
/// Linear in the vocabulary size; only the `top_k` survivors are sorted.
pub fn sample_top_k<R: Rng>(
    logits: &[f32],
    banned: &[TokenId],
    temperature: f32,
    top_k: usize,
    rng: &mut R,
) -> Option<TokenId> {
    let mut scaled: Vec<f32> = logits.iter().map(|v| v / temperature).collect();
    for &id in banned {
        if let Some(v) = usize::try_from(id).ok().and_then(|i| scaled.get_mut(i)) {
            *v = f32::NEG_INFINITY;
        }
    }
    let mut candidates: Vec<(usize, f32)> = scaled
        .into_iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .collect();

    let k = top_k.max(1);
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, |(_, a), (_, b)| b.total_cmp(a));
        candidates.truncate(k);
    }
    candidates.sort_by(|(_, a), (_, b)| b.total_cmp(a));

    let max_val = candidates.first()?.1;
    let weights: Vec<f32> = candidates.iter().map(|(_, v)| (v - max_val).exp()).collect();
    let total: f32 = weights.iter().sum();

    let r = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (&(idx, _), w) in candidates.iter().zip(&weights) {
        cumulative += w;
        if r < cumulative {
            return Some(idx as TokenId);
        }
    }
    candidates.last().map(|(idx, _)| *idx as TokenId)
}
