//! Application context
//!
//! Built once at startup and shared with every request handler.

use std::sync::Arc;

use tracing::warn;

use crate::config::Settings;
use crate::executor::Executor;
use crate::languages::RuntimeRegistry;
use crate::models::RuntimeInfo;
use crate::runner::ContainerBackend;

pub struct AppContext {
    registry: Arc<RuntimeRegistry>,
    backend: Arc<dyn ContainerBackend>,
    executor: Executor,
}

impl AppContext {
    pub fn new(
        settings: &Settings,
        registry: RuntimeRegistry,
        backend: Arc<dyn ContainerBackend>,
    ) -> Self {
        let registry = Arc::new(registry);
        let executor = Executor::new(
            registry.clone(),
            backend.clone(),
            Arc::new(settings.profile.clone()),
            settings.max_concurrent_jobs,
        );
        Self {
            registry,
            backend,
            executor,
        }
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Runtimes whose execution image is present
    pub async fn available_runtimes(&self) -> Vec<RuntimeInfo> {
        let mut available = Vec::new();
        for runtime in self.registry.all() {
            match self.backend.image_exists(&runtime.image).await {
                Ok(true) => available.push(RuntimeInfo::from(runtime)),
                Ok(false) => {}
                Err(e) => warn!("Could not check image {}: {}", runtime.image, e),
            }
        }
        available
    }
}
