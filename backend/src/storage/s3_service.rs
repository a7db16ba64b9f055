use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::{BlobStore, StorageError, extension_for, generate_object_key};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self {
            client,
            bucket_name,
        }
    }

    /// Base64 SHA-256 digest in the form S3 expects for `x-amz-checksum-sha256`.
    pub fn checksum_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        STANDARD.encode(hasher.finalize())
    }
}

#[async_trait]
impl BlobStore for S3Service {
    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        owner_id: i64,
        file_name: &str,
    ) -> Result<String, StorageError> {
        let key = generate_object_key(owner_id, &extension_for(content_type, file_name));
        let checksum = Self::checksum_sha256(&data);
        let size = data.len();

        // No ACL is set; objects stay private under the bucket's defaults.
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .checksum_sha256(checksum)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        log::info!("Uploaded {} bytes to s3://{}/{}", size, self.bucket_name, key);
        Ok(key)
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let config =
            PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(request.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;

        log::info!("Deleted s3://{}/{}", self.bucket_name, key);
        Ok(())
    }
}
