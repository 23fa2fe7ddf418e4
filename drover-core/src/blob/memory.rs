//! In-memory blob backend for tests.

use super::BlobStore;
use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    fail_puts: Mutex<bool>,
    fail_signing: Mutex<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put` calls fail, to exercise upload-error paths.
    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap() = fail;
    }

    /// Make subsequent `sign_url` calls fail.
    pub fn fail_signing(&self, fail: bool) {
        *self.fail_signing.lock().unwrap() = fail;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), CoreError> {
        if *self.fail_puts.lock().unwrap() {
            return Err(CoreError::Blob("injected put failure".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, String)>, CoreError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), CoreError> {
        let source = self.objects.lock().unwrap().get(from).cloned();
        let Some((bytes, content_type)) = source else {
            return Err(CoreError::Blob(format!("source blob '{from}' missing")));
        };
        self.put(to, &bytes, &content_type).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CoreError> {
        self.objects
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    fn sign_url(&self, key: &str, ttl_sec: u64) -> Result<String, CoreError> {
        if *self.fail_signing.lock().unwrap() {
            return Err(CoreError::Sign("injected signing failure".into()));
        }
        Ok(format!("mem://{key}?ttl={ttl_sec}"))
    }
}
