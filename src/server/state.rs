//! Shared application state: the process-wide model slot.

use std::sync::{Arc, Mutex, OnceLock};

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::pipeline::Inpainter;

/// Holds the inpainting model once it has loaded.
///
/// The slot is filled at most once. An empty slot means the model is still
/// loading or failed to load; either way generation is refused.
#[derive(Default)]
pub struct ModelSlot {
    model: OnceLock<Mutex<Box<dyn Inpainter>>>,
}

impl ModelSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the model. Returns false if one was already installed.
    pub fn install(&self, model: Box<dyn Inpainter>) -> bool {
        self.model.set(Mutex::new(model)).is_ok()
    }

    /// Whether a model is installed.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// The installed model, if any.
    #[must_use]
    pub fn get(&self) -> Option<&Mutex<Box<dyn Inpainter>>> {
        self.model.get()
    }
}

/// Shared application state.
#[derive(Default)]
pub struct AppState {
    /// The inpainting model.
    pub model: ModelSlot,
}

impl AppState {
    /// State with an empty model slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State with a model already installed.
    #[must_use]
    pub fn with_model(model: Box<dyn Inpainter>) -> Self {
        let state = Self::new();
        state.model.install(model);
        state
    }
}

pub type SharedState = Arc<AppState>;

/// Run `loader` on a blocking thread and install its model into `state`.
///
/// A failed load is logged and leaves the slot empty for the life of the process.
/// The handle resolves to whether a model was installed.
pub fn spawn_model_load<F>(state: SharedState, loader: F) -> JoinHandle<bool>
where
    F: FnOnce() -> Result<Box<dyn Inpainter>> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let banner = "=".repeat(50);
        tracing::info!("{banner}");
        tracing::info!("Start load model");

        let installed = match loader() {
            Ok(model) => state.model.install(model),
            Err(err) => {
                tracing::error!("FATAL ERROR: {err}");
                false
            }
        };

        if installed {
            tracing::info!("Model ready");
        }
        tracing::info!("{banner}");
        installed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::InpaintRequest;
    use image::RgbImage;

    struct Echo;

    impl Inpainter for Echo {
        fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage> {
            Ok(request.image.clone())
        }
    }

    #[test]
    fn test_slot_installs_once() {
        let slot = ModelSlot::new();
        assert!(!slot.is_loaded());

        assert!(slot.install(Box::new(Echo)));
        assert!(slot.is_loaded());
        assert!(!slot.install(Box::new(Echo)));
    }

    #[tokio::test]
    async fn test_failed_load_leaves_slot_empty() {
        let state = Arc::new(AppState::new());

        let installed = spawn_model_load(state.clone(), || Err(Error::ModelUnavailable))
            .await
            .unwrap();

        assert!(!installed);
        assert!(!state.model.is_loaded());
    }

    #[tokio::test]
    async fn test_successful_load_installs() {
        let state = Arc::new(AppState::new());

        let installed = spawn_model_load(state.clone(), || Ok(Box::new(Echo) as Box<dyn Inpainter>))
            .await
            .unwrap();

        assert!(installed);
        assert!(state.model.is_loaded());
    }
}
