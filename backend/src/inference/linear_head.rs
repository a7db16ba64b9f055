use ndarray::{Array1, Array2, Array4, s};
use neumo_shared::PredictionClass;
use serde::Deserialize;
use std::path::Path;

use super::{Classifier, InferenceError};

#[derive(Debug, Deserialize)]
struct LinearHeadArtifact {
    labels: Vec<String>,
    pool: [usize; 2],
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// Adaptive average pooling to a `pool[0] x pool[1]` grid per channel,
/// followed by a dense layer with one row per label.
#[derive(Debug, Clone)]
pub struct LinearHead {
    pool: (usize, usize),
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearHead {
    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            InferenceError::ModelLoad(format!("cannot read {}: {}", path.display(), e))
        })?;
        let head = Self::from_json(&raw)?;
        log::info!(
            "Loaded linear classifier head from {} ({} features)",
            path.display(),
            head.weights.ncols()
        );
        Ok(head)
    }

    pub fn from_json(raw: &str) -> Result<Self, InferenceError> {
        let artifact: LinearHeadArtifact = serde_json::from_str(raw)
            .map_err(|e| InferenceError::ModelLoad(format!("malformed artifact: {}", e)))?;

        let labels: Vec<Option<PredictionClass>> = artifact
            .labels
            .iter()
            .map(|l| PredictionClass::parse_diagnostic(l))
            .collect();
        let expected: Vec<Option<PredictionClass>> =
            PredictionClass::LABELS.iter().copied().map(Some).collect();
        if labels != expected {
            return Err(InferenceError::ModelLoad(format!(
                "artifact labels {:?} do not match {:?}",
                artifact.labels,
                PredictionClass::LABELS
            )));
        }

        let [ph, pw] = artifact.pool;
        if ph == 0 || pw == 0 {
            return Err(InferenceError::ModelLoad("pool size must be positive".to_string()));
        }
        let features = 3 * ph * pw;
        let rows = artifact.weights.len();
        if rows != labels.len() || artifact.weights.iter().any(|r| r.len() != features) {
            return Err(InferenceError::ModelLoad(format!(
                "weights must be {} x {}",
                labels.len(),
                features
            )));
        }
        if artifact.bias.len() != rows {
            return Err(InferenceError::ModelLoad(format!(
                "bias must have {} entries",
                rows
            )));
        }

        let flat: Vec<f32> = artifact.weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((rows, features), flat)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        Ok(Self {
            pool: (ph, pw),
            weights,
            bias: Array1::from(artifact.bias),
        })
    }

    fn pooled_features(&self, input: &Array4<f32>) -> Result<Array1<f32>, InferenceError> {
        let (n, c, h, w) = input.dim();
        let (ph, pw) = self.pool;
        if n != 1 || c != 3 {
            return Err(InferenceError::Execution(format!(
                "expected a [1, 3, H, W] tensor, got {:?}",
                input.shape()
            )));
        }
        if h < ph || w < pw {
            return Err(InferenceError::Execution(format!(
                "input {}x{} is smaller than the pooling grid {}x{}",
                h, w, ph, pw
            )));
        }

        let mut features = Vec::with_capacity(c * ph * pw);
        for channel in 0..c {
            for i in 0..ph {
                let (y0, y1) = (i * h / ph, ((i + 1) * h).div_ceil(ph));
                for j in 0..pw {
                    let (x0, x1) = (j * w / pw, ((j + 1) * w).div_ceil(pw));
                    let cell = input.slice(s![0, channel, y0..y1, x0..x1]);
                    features.push(cell.mean().unwrap_or(0.0));
                }
            }
        }
        Ok(Array1::from(features))
    }
}

impl Classifier for LinearHead {
    fn logits(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let features = self.pooled_features(input)?;
        Ok((self.weights.dot(&features) + &self.bias).to_vec())
    }
}
