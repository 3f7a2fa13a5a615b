// src/cli.rs

use actix_web::{body, http::Method};
use clap::Parser;
use serde_json::json;
use tokio::sync::mpsc;

use super::error::ServiceError;
use super::handlers;
use super::AppState;

#[derive(Parser, Debug)]
#[command(version, about = "Generates a single chatbot reply per request")]
pub struct Cli {
    /// Generate one reply for CONTEXT, print the status and body, then exit
    #[arg(long, value_name = "CONTEXT")]
    pub once: Option<String>,
}

/// Pushes one POST through the dispatcher without binding a socket. A
/// resource load failure is returned so the process exits non-zero.
pub async fn run_once(
    state: &AppState,
    context: &str,
    fatal: &mut mpsc::UnboundedReceiver<ServiceError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = serde_json::to_vec(&json!({ "context": context }))?;
    let resp = handlers::respond(state, &Method::POST, Ok(payload.as_slice())).await;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body()).await?;
    println!("{} {}", status.as_u16(), String::from_utf8_lossy(&bytes));
    match fatal.try_recv() {
        Ok(err) => Err(err.into()),
        Err(_) => Ok(()),
    }
}
