use std::{path::PathBuf, sync::Arc};

use crate::store::AgendaStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AgendaStore>,
    /// Directory served under `/media`; uploaded images are written below it.
    pub media_root: PathBuf,
}

impl AppState {
    pub fn new(store: Arc<dyn AgendaStore>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            media_root: media_root.into(),
        }
    }
}
