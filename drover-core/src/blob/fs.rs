//! Filesystem blob backend.
//!
//! Objects live under a root directory with a `.meta` sidecar carrying
//! the content type. Signed URLs are HMAC-SHA-256 over `key\nexp`,
//! URL-safe base64, redeemed at `GET /blob/{key}` on the dispatcher.

use super::BlobStore;
use crate::error::CoreError;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use drover_model::now_ms;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const META_SUFFIX: &str = ".meta";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Query half of a signed blob URL.
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub exp: i64,
    pub sig: String,
}

pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for FsBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBlobStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn key_is_safe(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && key.split('/').all(|part| {
            !part.is_empty() && part != "." && part != ".."
        })
}

impl FsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base: impl Into<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        let mut public_base = public_base.into();
        while public_base.ends_with('/') {
            public_base.pop();
        }
        FsBlobStore {
            root: root.into(),
            public_base,
            secret: secret.into(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, CoreError> {
        if !key_is_safe(key) {
            return Err(CoreError::Blob(format!("unsafe blob key '{key}'")));
        }
        Ok(self.root.join(key))
    }

    fn signature(&self, key: &str, exp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(exp.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a redeemed URL. False on expiry or tamper.
    pub fn verify(&self, key: &str, query: &SignedQuery) -> bool {
        if !key_is_safe(key) || query.exp <= now_ms() / 1000 {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(&query.sig) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(query.exp.to_string().as_bytes());
        mac.verify_slice(&presented).is_ok()
    }
}

async fn read_meta(path: &Path) -> String {
    let meta_path = PathBuf::from(format!("{}{META_SUFFIX}", path.display()));
    match tokio::fs::read_to_string(&meta_path).await {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => DEFAULT_CONTENT_TYPE.to_string(),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), CoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Blob(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CoreError::Blob(e.to_string()))?;
        let meta_path = PathBuf::from(format!("{}{META_SUFFIX}", path.display()));
        tokio::fs::write(&meta_path, content_type)
            .await
            .map_err(|e| CoreError::Blob(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, String)>, CoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let content_type = read_meta(&path).await;
                Ok(Some((bytes, content_type)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Blob(e.to_string())),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), CoreError> {
        let Some((bytes, content_type)) = self.get(from).await? else {
            return Err(CoreError::Blob(format!("source blob '{from}' missing")));
        };
        self.put(to, &bytes, &content_type).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CoreError> {
        let path = self.resolve(prefix.trim_end_matches('/'))?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("blob prefix delete failed for '{prefix}': {e}");
                Ok(())
            }
        }
    }

    fn sign_url(&self, key: &str, ttl_sec: u64) -> Result<String, CoreError> {
        if !key_is_safe(key) {
            return Err(CoreError::Sign(format!("unsafe blob key '{key}'")));
        }
        let exp = now_ms() / 1000 + ttl_sec as i64;
        let sig = self.signature(key, exp);
        Ok(format!(
            "{}/blob/{key}?exp={exp}&sig={sig}",
            self.public_base
        ))
    }
}
