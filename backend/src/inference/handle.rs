use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use shared::ArtifactStatus;
use tokio::sync::OnceCell;

use super::InferenceError;
use super::artifacts::ArtifactLoader;
use super::model::InferencePipeline;

/// Process-wide, load-once access to the inference pipeline.
///
/// Concurrent first callers wait on a single load. A failed load leaves the
/// handle empty, so the next caller tries again.
pub struct ModelHandle {
    loader: Arc<dyn ArtifactLoader>,
    pipeline: OnceCell<Arc<InferencePipeline>>,
    load_attempts: AtomicUsize,
}

impl ModelHandle {
    pub fn new(loader: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            loader,
            pipeline: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
        }
    }

    pub async fn pipeline(&self) -> Result<Arc<InferencePipeline>, InferenceError> {
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async {
                let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("Loading model artifacts (attempt {})", attempt);

                let loader = self.loader.clone();
                let loaded = match tokio::task::spawn_blocking(move || loader.load()).await {
                    Ok(loaded) => loaded,
                    Err(e) => return Err(InferenceError::ModelUnavailable(e.to_string())),
                };

                match loaded {
                    Ok(pipeline) => {
                        log::info!(
                            "Models loaded successfully ({} classes)",
                            pipeline.labels().len()
                        );
                        Ok(Arc::new(pipeline))
                    }
                    Err(e) => {
                        log::error!("Model loading failed: {}", e);
                        Err(InferenceError::ModelUnavailable(e.to_string()))
                    }
                }
            })
            .await?;
        Ok(pipeline.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.initialized()
    }

    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    pub fn artifact_report(&self) -> Vec<ArtifactStatus> {
        self.loader.report()
    }
}
