use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BlobStore, StorageError, extension_for, generate_object_key};

/// Blob store held in memory, with switches to force each operation to fail.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, (Bytes, String)>>>,
    fail_put: Arc<AtomicBool>,
    fail_presign: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_presigns(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(data, _)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        owner_id: i64,
        file_name: &str,
    ) -> Result<String, StorageError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StorageError::Upload("simulated upload failure".to_string()));
        }
        let key = generate_object_key(owner_id, &extension_for(content_type, file_name));
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), (data, content_type.to_string()));
        Ok(key)
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(StorageError::Presign("simulated presign failure".to_string()));
        }
        Ok(format!(
            "https://blobs.test/{}?expires_in={}",
            key,
            ttl.as_secs()
        ))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::Delete("simulated delete failure".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
