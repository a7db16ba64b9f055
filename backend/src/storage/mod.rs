pub mod s3_service;

#[cfg(test)]
pub mod memory_blob_store;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("presign failed: {0}")]
    Presign(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
}

/// Private, key-addressed object storage for the original upload bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` under a fresh key scoped to `owner_id` and returns the key.
    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        owner_id: i64,
        file_name: &str,
    ) -> Result<String, StorageError>;

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

pub fn extension_for(content_type: &str, file_name: &str) -> String {
    match content_type {
        "image/jpeg" | "image/jpg" => "jpg".to_string(),
        "image/png" => "png".to_string(),
        "image/tiff" => "tiff".to_string(),
        "image/bmp" => "bmp".to_string(),
        _ => file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "jpg".to_string()),
    }
}

pub fn generate_object_key(owner_id: i64, extension: &str) -> String {
    format!("predictions/{}/{}.{}", owner_id, uuid::Uuid::new_v4(), extension)
}
