mod api;
mod cache;
mod cli;
mod config;
mod cors;
mod engine;
mod error;
mod firestore;
mod handlers;
mod heartbeat;
mod llama;
mod model;
mod policy;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cache::ResourceCache;
use cli::Cli;
use config::Config;
use cors::CorsPolicy;
use engine::GenerationEngine;
use error::ServiceError;
use firestore::FirestoreStore;
use heartbeat::Heartbeat;
use llama::LlamaLoader;

/* ---------- Shared State ---------- */
pub struct AppState {
    resources: ResourceCache,
    heartbeat: Arc<Heartbeat>,
    engine: GenerationEngine,
    cors: CorsPolicy,
    /// Resource load failures; the server shuts down on the first one.
    fatal: mpsc::UnboundedSender<ServiceError>,
}

/* ---------- main ---------- */
#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatbot_api=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let heartbeat = Arc::new(if config.debug {
        tracing::info!("DEBUG set, heartbeat writes disabled");
        Heartbeat::disabled()
    } else {
        let store = FirestoreStore::new(config.gcp_project.clone())?;
        Heartbeat::new(
            Arc::new(store),
            config.heartbeat_collection.clone(),
            config.heartbeat_document.clone(),
        )
    });

    // Artifacts are read lazily by the first request, not here.
    let loader = Arc::new(LlamaLoader::new(config.n_ctx, config.n_gpu_layers)?);
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let app_state = web::Data::new(AppState {
        resources: ResourceCache::new(config.model_path.clone(), loader, heartbeat.clone()),
        heartbeat,
        engine: config.engine,
        cors: CorsPolicy::new(&config.allowed_origin)?,
        fatal: fatal_tx,
    });

    if let Some(context) = cli.once {
        return cli::run_once(&app_state, &context, &mut fatal_rx).await;
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        model = %app_state.resources.model_id(),
        origin = %config.allowed_origin,
        "Server starting"
    );

    let server = HttpServer::new({
        let app_state = app_state.clone();
        move || {
            App::new()
                .app_data(app_state.clone())
                .default_service(web::to(handlers::chat))
        }
    })
    .bind((config.host.as_str(), config.port))?
    .run();
    let handle = server.handle();

    tokio::select! {
        res = server => res?,
        Some(err) = fatal_rx.recv() => {
            tracing::error!(error = %err, "Stopping server");
            handle.stop(false).await;
            return Err(err.into());
        }
    }
    Ok(())
}
