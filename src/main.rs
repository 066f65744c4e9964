use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

mod config;
mod error;
mod handlers;
mod llm;
mod reconstruct;
mod state;
mod storage;
mod toy;
mod utils;

use config::Config;
use llm::{GeminiClient, GeminiSettings};
use reconstruct::{Reconstructor, TrellisClient, TrellisSettings};
use state::AppState;
use storage::Storage;
use toy::ToyService;
use utils::logging::init_logging;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::load()?;
    let _logging_guards = init_logging(&config.log_level);

    let storage = Storage::new(config.output_dir.clone(), config.temp_dir.clone());
    storage.ensure_dirs().await?;

    let gemini = GeminiClient::new(GeminiSettings {
        api_key: config.gemini_api_key.clone(),
        base_url: config.gemini_base_url.clone(),
        vision_model: config.gemini_vision_model.clone(),
        image_model: config.gemini_image_model.clone(),
        request_timeout: config.gemini_timeout(),
    });
    info!(
        "Gemini client ready (vision={}, image={})",
        config.gemini_vision_model, config.gemini_image_model
    );

    let trellis = TrellisClient::new(TrellisSettings {
        base_url: config.trellis_base_url.clone(),
        model: config.trellis_model.clone(),
        device: config.trellis_device.clone(),
        request_timeout: config.trellis_timeout(),
    });
    trellis.load().await?;

    let reconstructor = Reconstructor::new(
        Arc::new(trellis),
        storage.clone(),
        config.max_concurrent_reconstructions,
    );
    let service = ToyService::new(Arc::new(gemini), reconstructor, storage.clone());
    let state = AppState::new(service, storage, config.retention());
    let app = handlers::router(state, config.max_upload_bytes);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Toy generation API listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
