//! Helpers for pulling ndarray tensors out of ONNX Runtime outputs.

use ndarray::{Array3, Array4, ArrayD, Ix3, Ix4, IxDyn};
use ort::value::ValueRef;

use crate::error::{Error, Result};

/// Error for a session run that produced no outputs.
pub fn missing_output(what: &str) -> Error {
    Error::ShapeMismatch {
        expected: format!("{what} output"),
        actual: "no output".to_string(),
    }
}

/// Extract a 4D array from an ONNX value.
pub fn extract_array4(value: &ValueRef<'_>, what: &str) -> Result<Array4<f32>> {
    extract_array(value)?
        .into_dimensionality::<Ix4>()
        .map_err(|err| Error::ShapeMismatch {
            expected: format!("4D {what}"),
            actual: err.to_string(),
        })
}

/// Extract a 3D array from an ONNX value.
pub fn extract_array3(value: &ValueRef<'_>, what: &str) -> Result<Array3<f32>> {
    extract_array(value)?
        .into_dimensionality::<Ix3>()
        .map_err(|err| Error::ShapeMismatch {
            expected: format!("3D {what}"),
            actual: err.to_string(),
        })
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn extract_array(value: &ValueRef<'_>) -> Result<ArrayD<f32>> {
    let (shape_info, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Safe: tensor dimensions are always non-negative and within bounds
    let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();

    ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| Error::ShapeMismatch {
        expected: format!("{dims:?}"),
        actual: "reshape failed".to_string(),
    })
}
