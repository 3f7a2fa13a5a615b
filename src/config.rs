// src/config.rs

use std::str::FromStr;

use super::engine::{
    GenerationEngine, DEFAULT_MAX_CONTEXT_LENGTH, DEFAULT_MAX_RESPONSE_LENGTH, DEFAULT_MAX_RETRIES,
};
use super::error::ConfigError;

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model_path: String,
    pub allowed_origin: String,
    pub host: String,
    pub port: u16,
    /// Set when `DEBUG` is present; disables heartbeat writes.
    pub debug: bool,
    pub heartbeat_collection: String,
    pub heartbeat_document: String,
    pub gcp_project: Option<String>,
    pub engine: GenerationEngine,
    /// Context size that fits the prompt window plus the reply budget.
    pub n_ctx: u32,
    pub n_gpu_layers: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let engine = GenerationEngine {
            max_retries: parsed(&lookup, "MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            max_context_length: positive(&lookup, "MAX_CONTEXT_LENGTH", DEFAULT_MAX_CONTEXT_LENGTH)?,
            max_response_length: positive(&lookup, "MAX_RESPONSE_LENGTH", DEFAULT_MAX_RESPONSE_LENGTH)?,
        };
        let n_ctx = engine
            .max_context_length
            .checked_add(engine.max_response_length)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ConfigError::Invalid {
                key: "MAX_CONTEXT_LENGTH",
                value: engine.max_context_length.to_string(),
            })?;
        Ok(Self {
            model_path: string("MODEL_PATH", "models/chatbot.gguf"),
            allowed_origin: string("ALLOWED_ORIGIN", "https://ushikado.github.io"),
            host: string("HOST", "127.0.0.1"),
            port: parsed(&lookup, "PORT", 8080)?,
            debug: lookup("DEBUG").is_some(),
            heartbeat_collection: string("HEARTBEAT_COLLECTION", "chatbot"),
            heartbeat_document: string("HEARTBEAT_DOCUMENT", "chatbot"),
            gcp_project: lookup("GOOGLE_CLOUD_PROJECT").filter(|p| !p.is_empty()),
            engine,
            n_ctx,
            n_gpu_layers: parsed(&lookup, "N_GPU_LAYERS", 0)?,
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Like `parsed`, but zero is rejected too.
fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match parsed(lookup, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".into(),
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.debug);
        assert_eq!(cfg.engine, GenerationEngine::default());
        assert_eq!(cfg.heartbeat_collection, "chatbot");
        assert_eq!(cfg.heartbeat_document, "chatbot");
        assert_eq!(cfg.gcp_project, None);
        assert_eq!(cfg.n_ctx, 600);
        assert_eq!(cfg.allowed_origin, "https://ushikado.github.io");
    }

    #[test]
    fn debug_flag_is_presence_only() {
        assert!(config(&[("DEBUG", "")]).unwrap().debug);
        assert!(config(&[("DEBUG", "0")]).unwrap().debug);
    }

    #[test]
    fn overrides_engine_budget() {
        let cfg = config(&[("MAX_RETRIES", "3"), ("MAX_CONTEXT_LENGTH", " 64 ")]).unwrap();
        assert_eq!(cfg.engine.max_retries, 3);
        assert_eq!(cfg.engine.max_context_length, 64);
        assert_eq!(cfg.engine.max_response_length, DEFAULT_MAX_RESPONSE_LENGTH);
    }

    #[test]
    fn rejects_zero_lengths() {
        for key in ["MAX_CONTEXT_LENGTH", "MAX_RESPONSE_LENGTH"] {
            assert_eq!(
                config(&[(key, "0")]),
                Err(ConfigError::Invalid {
                    key,
                    value: "0".into()
                })
            );
        }
    }

    #[test]
    fn zero_retries_are_allowed() {
        assert_eq!(config(&[("MAX_RETRIES", "0")]).unwrap().engine.max_retries, 0);
    }

    #[test]
    fn rejects_lengths_past_the_context_size() {
        let err = config(&[("MAX_CONTEXT_LENGTH", "4294967296")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_CONTEXT_LENGTH", .. }));
        assert_eq!(
            config(&[("MAX_CONTEXT_LENGTH", "4294967000"), ("MAX_RESPONSE_LENGTH", "295")])
                .unwrap()
                .n_ctx,
            u32::MAX
        );
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert_eq!(
            config(&[("PORT", "http")]),
            Err(ConfigError::Invalid {
                key: "PORT",
                value: "http".into()
            })
        );
    }
}
