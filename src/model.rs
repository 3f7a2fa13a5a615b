// src/model.rs
//
// Contracts the pipeline needs from the pretrained artifact. The llama-backed
// implementations live in `llama.rs`.

use std::sync::Arc;

use super::api::TokenId;
use super::error::{SampleError, ServiceError};

pub trait Tokenizer: Send + Sync {
    /// Encodes text without injecting special tokens.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, SampleError>;

    fn decode(&self, ids: &[TokenId]) -> Result<String, SampleError>;

    /// Text the end-of-sequence token decodes to.
    fn eos_token(&self) -> &str;

    fn unknown_token_id(&self) -> Option<TokenId>;

    /// Reserved special tokens other than end-of-sequence.
    fn reserved_token_ids(&self) -> Vec<TokenId>;
}

/// Constraints for one stochastic sample.
#[derive(Debug, Clone, Copy)]
pub struct SamplingConstraints<'a> {
    /// Total length of the returned sequence, prompt included.
    pub max_length: usize,
    pub suppressed: &'a SuppressionSet,
    pub pad_token_id: TokenId,
}

pub trait LanguageModel: Send + Sync {
    fn eos_token_id(&self) -> TokenId;

    /// Samples one continuation. The returned sequence starts with `context`.
    fn sample(
        &self,
        context: &[TokenId],
        constraints: &SamplingConstraints<'_>,
    ) -> Result<Vec<TokenId>, SampleError>;
}

/// Loads pretrained artifacts by model identifier.
pub trait ArtifactLoader: Send + Sync {
    fn load_tokenizer(&self, model_id: &str) -> Result<Arc<dyn Tokenizer>, ServiceError>;

    fn load_model(&self, model_id: &str) -> Result<Arc<dyn LanguageModel>, ServiceError>;
}

/// Token sequences the model must never emit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressionSet {
    sequences: Vec<Vec<TokenId>>,
}

impl SuppressionSet {
    #[cfg(test)]
    pub fn new(sequences: Vec<Vec<TokenId>>) -> Self {
        Self { sequences }
    }

    /// `{[unk]} ∪ {[id] | id reserved}`
    pub fn from_tokenizer(tokenizer: &dyn Tokenizer) -> Self {
        let mut sequences: Vec<Vec<TokenId>> = Vec::new();
        let ids = tokenizer
            .unknown_token_id()
            .into_iter()
            .chain(tokenizer.reserved_token_ids());
        for id in ids {
            if !sequences.iter().any(|s| s.as_slice() == [id]) {
                sequences.push(vec![id]);
            }
        }
        Self { sequences }
    }

    pub fn sequences(&self) -> &[Vec<TokenId>] {
        &self.sequences
    }

    /// Tokens that would complete a suppressed sequence if emitted after
    /// `generated`.
    pub fn banned_next<'a>(
        &'a self,
        generated: &'a [TokenId],
    ) -> impl Iterator<Item = TokenId> + 'a {
        self.sequences.iter().filter_map(move |seq| {
            let (last, prefix) = seq.split_last()?;
            generated.ends_with(prefix).then_some(*last)
        })
    }
}
