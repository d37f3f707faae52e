use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::BackendConfig;
use crate::datastore::LocalBackend;
use crate::error::InitializationError;
use crate::session::SessionManager;
use crate::store::TaskStore;

/// Backend handles, built once at startup and handed to the view model.
#[derive(Clone)]
pub struct Backend {
    pub session: Arc<dyn SessionManager>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Backend {
    pub fn new(session: Arc<dyn SessionManager>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { session, tasks }
    }

    /// Connects to the project named by `config`, storing its data under
    /// `data_dir/<project_id>`.
    #[instrument(skip(config, data_dir), fields(project = %config.project_id))]
    pub fn connect(config: &BackendConfig, data_dir: &Path) -> Result<Self, InitializationError> {
        config.validate()?;
        let local = LocalBackend::open(&data_dir.join(config.project_id.trim()))?;
        info!(root = %local.root().display(), "backend connected");
        Ok(Self::from_local(local))
    }

    pub fn from_local(local: LocalBackend) -> Self {
        Self {
            session: Arc::new(local.clone()),
            tasks: Arc::new(local),
        }
    }
}
