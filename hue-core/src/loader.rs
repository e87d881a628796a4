use std::{future::Future, sync::Arc};

use anyhow::Result;
use tokio::sync::OnceCell;

use crate::{GenerationError, Pipeline};

pub trait Loader: Send + Sync {
    type Model: Pipeline + 'static;

    /// Identifier of the model this loader fetches, used in error reports.
    fn model_id(&self) -> &str;

    fn load(&self) -> impl Future<Output = Result<Self::Model>> + Send;
}

/// Lazily loads a pipeline on first use and hands out the same instance afterwards.
///
/// A failed load is not remembered: the next call to [`PipelineCell::get`] tries again.
pub struct PipelineCell<L: Loader> {
    loader: L,
    pipeline: OnceCell<Arc<L::Model>>,
}

impl<L: Loader> PipelineCell<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            pipeline: OnceCell::new(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.initialized()
    }

    pub async fn get(&self) -> Result<Arc<L::Model>, GenerationError> {
        self.pipeline
            .get_or_try_init(|| async {
                tracing::info!(model = self.loader.model_id(), "loading pipeline");
                let model = self.loader.load().await?;
                tracing::info!(model = self.loader.model_id(), "pipeline ready");
                Ok::<_, anyhow::Error>(Arc::new(model))
            })
            .await
            .cloned()
            .map_err(|e| {
                tracing::error!(model = self.loader.model_id(), "pipeline construction failed: {e:#}");
                GenerationError::PipelineConstruction {
                    model: self.loader.model_id().to_string(),
                    message: format!("{e:#}"),
                }
            })
    }
}
