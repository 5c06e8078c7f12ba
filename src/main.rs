use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use vbase_rce::config::Settings;
use vbase_rce::languages::RuntimeRegistry;
use vbase_rce::runner::{ContainerBackend, DockerBackend};
use vbase_rce::{server, AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vbase_rce=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let settings = Settings::from_env().context("Invalid configuration")?;

    let registry = match &settings.languages_path {
        Some(path) => {
            let registry = RuntimeRegistry::from_path(path)?;
            info!("Loaded language configurations from {}", path.display());
            registry
        }
        None => {
            info!("Using embedded language configurations");
            RuntimeRegistry::embedded()?
        }
    };

    info!("Starting vbase-rce...");

    let docker = DockerBackend::connect().context("Failed to create Docker client")?;
    docker
        .ping()
        .await
        .context("Docker daemon is not reachable")?;
    info!("Connected to Docker daemon");

    for runtime in registry.all() {
        match docker.image_exists(&runtime.image).await {
            Ok(true) => info!("Runtime {} available ({})", runtime.language, runtime.image),
            Ok(false) => warn!(
                "Image {} for {} not built, requests for it will fail",
                runtime.image, runtime.language
            ),
            Err(e) => warn!("Could not check image {}: {}", runtime.image, e),
        }
    }

    let ctx = Arc::new(AppContext::new(&settings, registry, Arc::new(docker)));
    info!(
        "Admission capacity: {} concurrent execution(s)",
        ctx.executor().gate().capacity()
    );

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!("Listening on {}", settings.bind_addr);

    axum::serve(listener, server::router(ctx))
        .await
        .context("HTTP server failed")?;

    Ok(())
}
