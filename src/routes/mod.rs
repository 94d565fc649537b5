pub mod api;

use std::sync::Arc;

use crate::store::{JobStore, RecordSink};

/// Store handles shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub records: Arc<dyn RecordSink>,
}
