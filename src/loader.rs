// Model loading and the readiness gate shared with the detection loop

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{error, info, warn};

use crate::config::ModelsConfig;
use crate::error::{MoodMirrorError, Result};
use crate::inference::{FaceModel, OnnxFaceModel};

/// Where the model load currently stands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// Cloneable readiness gate around the loaded model.
///
/// Readiness flips from false to true once, when a model is installed,
/// and never goes back.
#[derive(Clone, Default)]
pub struct ModelHandle {
    model: Arc<OnceLock<Arc<dyn FaceModel>>>,
    status: Arc<Mutex<Option<LoadStatus>>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.model.get().is_some()
    }

    /// The loaded model, if readiness has been reached
    pub fn get(&self) -> Option<Arc<dyn FaceModel>> {
        self.model.get().cloned()
    }

    pub fn status(&self) -> LoadStatus {
        if self.is_ready() {
            return LoadStatus::Ready;
        }
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(LoadStatus::Idle)
    }

    /// Installs the model. Returns `false` if one was already installed.
    pub fn install(&self, model: Arc<dyn FaceModel>) -> bool {
        let installed = self.model.set(model).is_ok();
        if installed {
            self.set_status(LoadStatus::Ready);
        } else {
            warn!("Models already loaded, ignoring second installation");
        }
        installed
    }

    fn set_status(&self, status: LoadStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("status", &self.status())
            .finish()
    }
}

/// Loads the detector, landmark and expression artifacts in the background
pub struct ModelLoader {
    config: ModelsConfig,
    handle: ModelHandle,
}

impl ModelLoader {
    pub fn new(config: ModelsConfig, handle: ModelHandle) -> Self {
        Self { config, handle }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Loads all artifacts from the configured directory
    pub async fn load(&self) -> Result<()> {
        let config = self.config.clone();
        info!("Loading models from {}", config.dir.display());
        self.load_with(move || OnnxFaceModel::load(&config)).await
    }

    /// Runs `build` on the blocking pool and installs its model on success.
    ///
    /// On failure readiness stays false and the status records the error.
    /// Nothing is retried.
    pub async fn load_with<M, F>(&self, build: F) -> Result<()>
    where
        M: FaceModel + 'static,
        F: FnOnce() -> Result<M> + Send + 'static,
    {
        if self.handle.is_ready() {
            return Ok(());
        }
        self.handle.set_status(LoadStatus::Loading);

        let outcome = tokio::task::spawn_blocking(build)
            .await
            .map_err(|e| MoodMirrorError::ModelLoad(format!("Model loading task failed: {e}")))
            .and_then(|result| result);

        match outcome {
            Ok(model) => {
                self.handle.install(Arc::new(model));
                info!("Models ready");
                Ok(())
            }
            Err(e) => {
                error!("Failed to load models: {}", e);
                self.handle.set_status(LoadStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}
