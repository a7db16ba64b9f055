use ndarray::Array4;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{Classification, Classifier, InferenceError, ModelLoader};

/// Lazily loaded, shared classifier. The first caller runs the loader; the
/// others wait for it. A failed load leaves the cell empty.
pub struct InferenceEngine {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn Classifier>>,
    deadline: Duration,
}

impl InferenceEngine {
    pub fn new(loader: Arc<dyn ModelLoader>, deadline: Duration) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            deadline,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    pub async fn load(&self) -> Result<Arc<dyn Classifier>, InferenceError> {
        self.model
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                log::info!("Loading classifier");
                let model = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| InferenceError::Worker(e.to_string()))?
                    .inspect_err(|e| log::error!("Failed to load classifier: {}", e))?;
                log::info!("Classifier ready");
                Ok(model)
            })
            .await
            .cloned()
    }

    pub async fn classify(&self, input: Array4<f32>) -> Result<Classification, InferenceError> {
        let model = self.load().await?;
        let task = tokio::task::spawn_blocking(move || {
            let logits = model.logits(&input)?;
            Classification::from_logits(&logits)
        });

        match tokio::time::timeout(self.deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(InferenceError::Worker(join.to_string())),
            Err(_) => Err(InferenceError::Timeout),
        }
    }
}
