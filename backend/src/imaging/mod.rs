pub mod config;
pub mod intake;
pub mod preprocess;

use bytes::Bytes;

pub use config::PreprocessConfig;
pub use intake::ImageIntake;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Could not decode image: {0}")]
    Decode(String),
    #[error("File too large ({size} bytes). Maximum size: {} MB", .max / (1024 * 1024))]
    TooLarge { size: usize, max: usize },
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("image worker failed: {0}")]
    Worker(String),
}

/// An uploaded file buffered in memory. `bytes` is reference counted, so
/// clones share the same buffer.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedImage {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Declared content type, lowercased with `image/jpg` folded into `image/jpeg`.
    pub fn canonical_content_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|raw| {
            let essence = raw.split(';').next().unwrap_or(raw).trim().to_ascii_lowercase();
            if essence == "image/jpg" {
                "image/jpeg".to_string()
            } else {
                essence
            }
        })
    }
}
