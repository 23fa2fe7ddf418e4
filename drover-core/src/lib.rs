//! Dispatcher core for the drover control plane.
//!
//! Everything mutable lives in a shared coordination store behind the
//! [`store::CoordStore`] trait, so any number of front-end replicas can
//! operate against the same queue, lease table, worker registry, and
//! per-job event logs. Compound transitions (lease acquisition, active
//! slot accounting) are atomic inside the store backend.

pub mod blob;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod sanitize;
pub mod store;

pub use blob::BlobStore;
pub use dispatch::{DispatchConfig, Dispatcher};
pub use error::CoreError;
pub use store::CoordStore;
