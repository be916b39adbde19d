//! Fine-tuned `UNet` checkpoint detection.

use std::fmt;
use std::path::Path;

use ort::session::Session;

use crate::error::{Error, Result};

use super::loader::load_session;

/// ONNX graph of a fine-tuned `UNet`.
const ONNX_FILE: &str = "model.onnx";

/// Safetensors weights as written by diffusers.
const SAFETENSORS_FILE: &str = "diffusion_pytorch_model.safetensors";

/// Layout of a fine-tuned `UNet` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// An exported ONNX graph, loadable directly.
    Onnx,
    /// diffusers safetensors weights.
    Safetensors,
    /// Anything else, treated as PyTorch `.bin` weights.
    Bin,
}

impl fmt::Display for CheckpointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onnx => f.write_str("ONNX"),
            Self::Safetensors => f.write_str("Safetensors"),
            Self::Bin => f.write_str("Bin"),
        }
    }
}

/// Inspect `dir`, returning `None` when it does not exist.
#[must_use]
pub fn detect_checkpoint(dir: &Path) -> Option<CheckpointFormat> {
    if !dir.is_dir() {
        return None;
    }

    if dir.join(ONNX_FILE).is_file() {
        Some(CheckpointFormat::Onnx)
    } else if dir.join(SAFETENSORS_FILE).is_file() {
        Some(CheckpointFormat::Safetensors)
    } else {
        Some(CheckpointFormat::Bin)
    }
}

/// Load the fine-tuned `UNet` in `dir` according to its detected `format`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedCheckpoint`] for PyTorch-format weights, which the
/// ONNX runtime cannot execute, or a load error for a broken graph.
pub fn load_checkpoint_unet(dir: &Path, format: CheckpointFormat) -> Result<Session> {
    match format {
        CheckpointFormat::Onnx => load_session(&dir.join(ONNX_FILE), "fine-tuned unet"),
        CheckpointFormat::Safetensors | CheckpointFormat::Bin => {
            Err(Error::UnsupportedCheckpoint {
                path: dir.to_path_buf(),
                reason: format!("{format} weights must be exported to {ONNX_FILE} first"),
            })
        }
    }
}
