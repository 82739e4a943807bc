use anyhow::Result;
use facegate_core::ArcFaceExtractor;
use facegated::{config::Config, engine, fanout, LogNotifier};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();

    // Fail fast: storage backend and model must be available before we
    // accept any work.
    let store = facegate_store::open_store(&config.store)?;
    let extractor = ArcFaceExtractor::load(&config.model_path.to_string_lossy())?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let fanout_task = fanout::spawn_fanout(events_rx, vec![Box::new(LogNotifier)]);

    let engine = Arc::new(engine::Engine::new(
        engine::EngineConfig {
            quality: config.quality,
            liveness: config.liveness,
            confidence_threshold: config.confidence_threshold,
            cooldown: config.cooldown,
            max_embeddings_per_identity: config.max_embeddings_per_identity,
            gallery_path: config.gallery_path,
        },
        Box::new(extractor),
        store,
        events_tx,
    ));

    tracing::info!("facegated ready");

    // Run until signaled. Capture frontends (HTTP handlers, camera
    // pollers) share this engine handle.
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    if let Err(e) = engine.persist_gallery() {
        tracing::warn!(error = %e, "failed to persist gallery on shutdown");
    }

    // Dropping the engine closes the event channel; wait for the
    // drain task to deliver what is already queued.
    drop(engine);
    let _ = fanout_task.await;

    Ok(())
}
