// src/handlers.rs

use std::sync::Arc;

use actix_web::{http::Method, web, HttpRequest, HttpResponse, ResponseError};

use super::api::ChatPayload;
use super::cache::TokenizerResources;
use super::error::{ServiceError, TEXT_PLAIN_UTF8};
use super::model::LanguageModel;
use super::AppState;

/// Largest request body read; anything longer is an invalid request.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Single endpoint, multiplexed on the request method.
pub async fn chat(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    match payload.to_bytes_limited(MAX_BODY_BYTES).await {
        Ok(Ok(bytes)) => respond(&state, req.method(), Ok(&bytes[..])).await,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to read request body");
            respond(&state, req.method(), Err(ServiceError::InvalidRequest)).await
        }
        Err(_) => {
            tracing::debug!(limit = MAX_BODY_BYTES, "Request body too large");
            respond(&state, req.method(), Err(ServiceError::InvalidRequest)).await
        }
    }
}

/// `body` is `Err` when the request body could not be read; only POST looks
/// at it.
pub async fn respond(
    state: &AppState,
    method: &Method,
    body: Result<&[u8], ServiceError>,
) -> HttpResponse {
    state.heartbeat.beat();

    let (tokenizer, model) = match ensure_resources(state).await {
        Ok(resources) => resources,
        Err(e) => {
            tracing::error!(error = %e, "Cannot serve without model resources");
            let resp = state.cors.apply(e.error_response());
            // The receiver stops the server; nothing more to do if it is gone.
            let _ = state.fatal.send(e);
            return resp;
        }
    };

    if *method != Method::POST {
        return state.cors.preflight();
    }

    let resp = match generate_reply(state, tokenizer, model, body).await {
        Ok(text) => HttpResponse::Ok().content_type(TEXT_PLAIN_UTF8).body(text),
        Err(e) => e.error_response(),
    };
    state.cors.apply(resp)
}

async fn ensure_resources(
    state: &AppState,
) -> Result<(TokenizerResources, Arc<dyn LanguageModel>), ServiceError> {
    let tokenizer = state.resources.ensure_tokenizer().await?.clone();
    let model = Arc::clone(state.resources.ensure_model().await?);
    Ok((tokenizer, model))
}

async fn generate_reply(
    state: &AppState,
    resources: TokenizerResources,
    model: Arc<dyn LanguageModel>,
    body: Result<&[u8], ServiceError>,
) -> Result<String, ServiceError> {
    let payload = ChatPayload::from_body(body?)?;
    let context = resources.tokenizer.encode(&payload.context).map_err(|e| {
        tracing::warn!(error = %e, "Failed to encode context");
        ServiceError::GenerationFailed
    })?;

    // Sampling is CPU-bound; keep it off the async workers.
    let engine = state.engine;
    let outcome = web::block(move || {
        engine.generate(
            resources.tokenizer.as_ref(),
            model.as_ref(),
            &resources.suppression,
            &context,
        )
    })
    .await
    .map_err(|_e| ServiceError::GenerationFailed)?;

    match outcome {
        Ok(Some(text)) => Ok(text),
        Ok(None) => Err(ServiceError::GenerationFailed),
        Err(e) => {
            tracing::error!(error = %e, "Generation aborted");
            Err(ServiceError::GenerationFailed)
        }
    }
}
