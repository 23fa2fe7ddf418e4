use std::{fmt, sync::Arc};

use crate::infra::config::Config;
use drover_core::Dispatcher;
use drover_core::blob::FsBlobStore;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
    /// Present when the filesystem blob backend is in use; its signed
    /// URLs are redeemed through this server at `GET /blob/{key}`.
    pub fs_blob: Option<Arc<FsBlobStore>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        config: Arc<Config>,
        fs_blob: Option<Arc<FsBlobStore>>,
    ) -> Self {
        AppState {
            dispatcher,
            config,
            fs_blob,
        }
    }
}
