use bytes::Bytes;
use ndarray::Array4;
use neumo_shared::ImageMetadata;
use std::sync::Arc;

use super::config::PreprocessConfig;
use super::{ImageError, UploadedImage, preprocess};

pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/tiff", "image/bmp"];

/// Upload checks and tensor preparation for chest X-ray images.
#[derive(Debug, Clone)]
pub struct ImageIntake {
    max_bytes: usize,
    preprocess: Arc<PreprocessConfig>,
}

impl ImageIntake {
    pub fn new(max_bytes: usize, preprocess: PreprocessConfig) -> Self {
        Self {
            max_bytes,
            preprocess: Arc::new(preprocess),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Checks the declared content type and buffered length. The bytes
    /// themselves are not inspected.
    pub fn validate(&self, upload: &UploadedImage) -> Result<(), ImageError> {
        if upload.size() > self.max_bytes {
            return Err(ImageError::TooLarge {
                size: upload.size(),
                max: self.max_bytes,
            });
        }

        match upload.canonical_content_type() {
            Some(ct) if ALLOWED_CONTENT_TYPES.contains(&ct.as_str()) => Ok(()),
            Some(ct) => Err(ImageError::UnsupportedType(ct)),
            None => Err(ImageError::UnsupportedType("unknown".to_string())),
        }
    }

    pub async fn metadata(&self, bytes: Bytes) -> Result<ImageMetadata, ImageError> {
        tokio::task::spawn_blocking(move || preprocess::describe(&bytes))
            .await
            .map_err(|e| ImageError::Worker(e.to_string()))?
    }

    pub async fn normalize(&self, bytes: Bytes) -> Result<Array4<f32>, ImageError> {
        let config = Arc::clone(&self.preprocess);
        tokio::task::spawn_blocking(move || preprocess::normalize(&bytes, &config))
            .await
            .map_err(|e| ImageError::Worker(e.to_string()))?
    }
}
