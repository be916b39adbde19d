//! Model files, execution device, and fine-tuned checkpoint handling.

mod checkpoint;
mod device;
mod loader;

pub use checkpoint::{detect_checkpoint, load_checkpoint_unet, CheckpointFormat};
pub use device::{select_device, DevicePreference, ExecutionDevice};
pub use loader::{load_session, ModelCache, ModelType, DEFAULT_MODEL_ID};
