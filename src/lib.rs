//! Riverside - multi-participant session recording.
//!
//! Local capture, chunked recording and a resumable upload/processing
//! pipeline, driven by a single session controller.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod session;
pub mod upload;
pub mod utils;

use capture::MediaBackend;
use config::{AppConfig, LoggingConfig};
use session::{RecordingToggle, SessionController};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload::{ArtifactStatus, HttpStore, MemoryStore, RemoteStore};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("riverside=info,riverside_lib=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn media_backend() -> Arc<dyn MediaBackend> {
    #[cfg(feature = "native")]
    {
        Arc::new(capture::native::NativeBackend::new())
    }
    #[cfg(not(feature = "native"))]
    {
        Arc::new(capture::VirtualBackend::default_lineup())
    }
}

fn remote_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    Ok(match &config.remote.base_url {
        Some(url) => {
            tracing::info!("Uploading to {}", url);
            Arc::new(HttpStore::new(url.as_str(), config.upload.request_timeout())?)
        }
        None => {
            tracing::info!("No remote configured, using the in-process store");
            Arc::new(MemoryStore::new())
        }
    })
}

/// Resolve on the next hot-plug notification; never resolves without a source
async fn next_device_change(changes: &mut Option<broadcast::Receiver<()>>) {
    loop {
        let Some(rx) = changes.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => *changes = None,
        }
    }
}

async fn record_session(config: AppConfig) -> anyhow::Result<()> {
    let backend = media_backend();
    tracing::info!("Using {} capture backend", backend.name());

    let store = remote_store(&config)?;
    let mut controller = SessionController::new(config.clone(), backend, store);
    let mut changes = controller.registry().subscribe_changes();

    controller.prepare().await?;

    let RecordingToggle::Started { artifact_id, .. } = controller.toggle_recording().await? else {
        anyhow::bail!("expected a new recording to start");
    };

    let deadline = tokio::time::sleep(Duration::from_secs(config.session.record_seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping recording");
                break;
            }
            _ = next_device_change(&mut changes) => {
                if let Err(e) = controller.handle_device_change().await {
                    tracing::warn!("Device change handling failed: {}", e);
                }
            }
        }
    }

    match controller.toggle_recording().await {
        Ok(stopped) => tracing::info!("Recording stopped: {:?}", stopped),
        Err(e) => tracing::warn!("Recording ended with error: {}", e),
    }
    controller.leave().await;

    let Some(artifact) = controller.pipeline().wait_settled(artifact_id).await else {
        anyhow::bail!("artifact {artifact_id} was never created");
    };
    match artifact.status {
        ArtifactStatus::Ready => tracing::info!(
            "Artifact '{}' ready: {}, {}",
            artifact.name,
            artifact.duration_label(),
            artifact.size_label()
        ),
        _ => {
            let cause = artifact
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_default();
            anyhow::bail!("artifact '{}' failed: {}", artifact.name, cause);
        }
    }
    Ok(())
}

/// Load configuration, record one session and wait for its upload
///
/// The configuration path is the first command line argument
/// (default `riverside.json`).
pub fn run() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("riverside.json"));
    let config = AppConfig::load(&path)?;

    init_tracing(&config.logging);
    tracing::info!("Starting Riverside v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(record_session(config))
}
