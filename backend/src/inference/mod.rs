pub mod engine;
pub mod linear_head;
#[cfg(feature = "torch")]
pub mod torchscript;

use ndarray::Array4;
use neumo_shared::{ClassProbability, PredictionClass};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use engine::InferenceEngine;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("{0}")]
    ModelLoad(String),
    #[error("classifier returned {got} scores, expected {expected}")]
    OutputShape { expected: usize, got: usize },
    #[error("inference failed: {0}")]
    Execution(String),
    #[error("inference timed out")]
    Timeout,
    #[error("inference worker failed: {0}")]
    Worker(String),
}

/// A loaded model. Produces one logit per entry of `PredictionClass::LABELS`,
/// in that order.
pub trait Classifier: Send + Sync {
    fn logits(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn Classifier>, InferenceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: PredictionClass,
    pub confidence: f32,
    pub distribution: Vec<ClassProbability>,
}

impl Classification {
    pub fn from_logits(logits: &[f32]) -> Result<Self, InferenceError> {
        let labels = PredictionClass::LABELS;
        if logits.len() != labels.len() {
            return Err(InferenceError::OutputShape {
                expected: labels.len(),
                got: logits.len(),
            });
        }
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::Execution("non-finite logits".to_string()));
        }

        let probabilities = softmax(logits);
        // Ties resolve to the earlier label.
        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = i;
            }
        }

        Ok(Self {
            label: labels[best],
            confidence: probabilities[best].clamp(0.0, 1.0),
            distribution: labels
                .iter()
                .zip(&probabilities)
                .map(|(class, probability)| ClassProbability {
                    class: *class,
                    probability: *probability,
                })
                .collect(),
        })
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Classifier artifact on disk. The file extension selects the format:
/// `.json` for a linear head, `.pt`/`.pth` for TorchScript.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    path: PathBuf,
}

impl ModelArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelLoader for ModelArtifact {
    fn load(&self) -> Result<Arc<dyn Classifier>, InferenceError> {
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("json") => Ok(Arc::new(linear_head::LinearHead::from_file(&self.path)?)),
            #[cfg(feature = "torch")]
            Some("pt" | "pth") => Ok(Arc::new(torchscript::TorchScriptModel::load(&self.path)?)),
            #[cfg(not(feature = "torch"))]
            Some("pt" | "pth") => Err(InferenceError::ModelLoad(format!(
                "{} is a TorchScript model but the torch feature is disabled",
                self.path.display()
            ))),
            _ => Err(InferenceError::ModelLoad(format!(
                "unrecognised model artifact {}",
                self.path.display()
            ))),
        }
    }
}
