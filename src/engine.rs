// src/engine.rs

use super::api::TokenId;
use super::error::SampleError;
use super::model::{LanguageModel, SamplingConstraints, SuppressionSet, Tokenizer};
use super::policy;

pub const DEFAULT_MAX_RETRIES: usize = 20;
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 500;
pub const DEFAULT_MAX_RESPONSE_LENGTH: usize = 100;

/// Bounded-retry sampling: resample until the reply passes the validity
/// policy or the attempt budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationEngine {
    pub max_retries: usize,
    pub max_context_length: usize,
    pub max_response_length: usize,
}

impl Default for GenerationEngine {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            max_response_length: DEFAULT_MAX_RESPONSE_LENGTH,
        }
    }
}

impl GenerationEngine {
    /// Returns `Ok(None)` once every attempt is spent. `Err` is reserved for
    /// failures another sample cannot fix.
    pub fn generate(
        &self,
        tokenizer: &dyn Tokenizer,
        model: &dyn LanguageModel,
        suppression: &SuppressionSet,
        context: &[TokenId],
    ) -> Result<Option<String>, SampleError> {
        for attempt in 1..=self.max_retries {
            match self.attempt(tokenizer, model, suppression, context) {
                Ok(text) if policy::is_valid(&text) => {
                    tracing::debug!(attempt, chars = text.chars().count(), "accepted reply");
                    return Ok(Some(text));
                }
                Ok(text) => {
                    tracing::debug!(attempt, chars = text.chars().count(), "rejected reply");
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt, error = %e, "sampling attempt failed");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::warn!(attempts = self.max_retries, "no valid reply within the retry budget");
        Ok(None)
    }

    /// One sample from the last `max_context_length` tokens of `context`.
    fn attempt(
        &self,
        tokenizer: &dyn Tokenizer,
        model: &dyn LanguageModel,
        suppression: &SuppressionSet,
        context: &[TokenId],
    ) -> Result<String, SampleError> {
        let window = trailing_window(context, self.max_context_length);
        let constraints = SamplingConstraints {
            max_length: window.len() + self.max_response_length,
            suppressed: suppression,
            pad_token_id: model.eos_token_id(),
        };
        let output = model.sample(window, &constraints)?;
        let reply = output.get(window.len()..).unwrap_or_default();
        let text = tokenizer.decode(reply)?;
        Ok(text.replace(tokenizer.eos_token(), "").trim().to_string())
    }
}

/// The most recent `max_len` tokens; older ones are dropped.
pub fn trailing_window(context: &[TokenId], max_len: usize) -> &[TokenId] {
    &context[context.len().saturating_sub(max_len)..]
}
