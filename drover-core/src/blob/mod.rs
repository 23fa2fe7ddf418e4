//! Blob-store abstraction for job input/output artifacts.
//!
//! The dispatcher only ever speaks this trait; remote object stores
//! implement it out of tree. [`FsBlobStore`] backs single-node
//! deployments with HMAC-signed URLs redeemed through the dispatcher's
//! own HTTP surface, and [`MemoryBlobStore`] backs tests.

mod fs;
mod memory;

pub use fs::{FsBlobStore, SignedQuery};
pub use memory::MemoryBlobStore;

use crate::error::CoreError;
use async_trait::async_trait;

/// Blob layout: inputs at `jobs/{id}/input/{safe_name}`, outputs at
/// `jobs/{id}/output/output.jpg`.
pub fn input_key(job_id: &str, safe_name: &str) -> String {
    format!("jobs/{job_id}/input/{safe_name}")
}

pub fn output_key(job_id: &str) -> String {
    format!("jobs/{job_id}/output/output.jpg")
}

pub fn job_prefix(job_id: &str) -> String {
    format!("jobs/{job_id}/")
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), CoreError>;

    /// Bytes and content type, or `None` for a missing key.
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, String)>, CoreError>;

    async fn copy(&self, from: &str, to: &str) -> Result<(), CoreError>;

    /// Best-effort recursive delete of everything under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), CoreError>;

    /// Time-limited signed URL granting read access to `key`.
    fn sign_url(&self, key: &str, ttl_sec: u64) -> Result<String, CoreError>;
}
