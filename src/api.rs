// src/api.rs

use serde_json::Value;

use super::error::ServiceError;

/// Token id in the model vocabulary.
pub type TokenId = i32;

/// Body of a generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPayload {
    pub context: String,
}

impl ChatPayload {
    /// Parses a request body. Anything but an object with a non-empty string
    /// `context` is rejected.
    pub fn from_body(body: &[u8]) -> Result<Self, ServiceError> {
        // Only objects answer `get("context")`; a derived struct would also
        // read `["hi"]` positionally.
        let value: Value = serde_json::from_slice(body).map_err(|_| ServiceError::InvalidRequest)?;
        match value.get("context") {
            Some(Value::String(context)) if !context.is_empty() => {
                Ok(Self {
                    context: context.clone(),
                })
            }
            _ => Err(ServiceError::InvalidRequest),
        }
    }
}
