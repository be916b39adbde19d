//! CLIP prompt encoding.

use std::path::Path;

use ndarray::{concatenate, Array2, Array3, Axis};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use crate::error::{Error, Result};

use super::onnx::{extract_array3, missing_output};

/// CLIP context length.
pub const MAX_TOKENS: usize = 77;

/// End-of-text token, also used for padding by Stable Diffusion 1.x.
const END_OF_TEXT: &str = "<|endoftext|>";

/// Tokenizer plus ONNX text encoder.
pub struct PromptEncoder {
    tokenizer: Tokenizer,
    encoder: Session,
    pad_id: u32,
}

impl PromptEncoder {
    /// Load the tokenizer from `tokenizer_path` and pair it with `encoder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be read or lacks an end-of-text token.
    pub fn new(tokenizer_path: &Path, encoder: Session) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|err| Error::TokenizerLoad {
                path: tokenizer_path.to_path_buf(),
                reason: err.to_string(),
            })?;

        let pad_id = tokenizer
            .token_to_id(END_OF_TEXT)
            .ok_or_else(|| Error::TokenizerLoad {
                path: tokenizer_path.to_path_buf(),
                reason: format!("missing {END_OF_TEXT} token"),
            })?;

        Ok(Self {
            tokenizer,
            encoder,
            pad_id,
        })
    }

    /// Token ids for `prompt`, truncated and padded to [`MAX_TOKENS`].
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization fails.
    pub fn token_ids(&self, prompt: &str) -> Result<Vec<i32>> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|err| Error::Tokenize {
                reason: err.to_string(),
            })?;

        Ok(pad_tokens(encoding.get_ids(), self.pad_id))
    }

    /// Hidden states (1, 77, 768) for a single prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or inference fails.
    pub fn encode(&mut self, prompt: &str) -> Result<Array3<f32>> {
        let ids = self.token_ids(prompt)?;
        let input_ids = Array2::from_shape_vec((1, MAX_TOKENS), ids).map_err(|_| {
            Error::ShapeMismatch {
                expected: format!("{MAX_TOKENS} token ids"),
                actual: "reshape failed".to_string(),
            }
        })?;

        let input_value =
            Tensor::from_array(input_ids).map_err(|source| Error::Inference { source })?;
        let outputs = self
            .encoder
            .run(ort::inputs!["input_ids" => input_value])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("last_hidden_state"))?;
        extract_array3(&output, "last_hidden_state")
    }

    /// Hidden states for `[negative, prompt]` stacked along the batch axis.
    ///
    /// # Errors
    ///
    /// Returns an error if either prompt fails to encode.
    pub fn encode_pair(&mut self, negative: &str, prompt: &str) -> Result<Array3<f32>> {
        let uncond = self.encode(negative)?;
        let cond = self.encode(prompt)?;

        concatenate(Axis(0), &[uncond.view(), cond.view()]).map_err(|err| Error::ShapeMismatch {
            expected: "matching prompt embeddings".to_string(),
            actual: err.to_string(),
        })
    }
}

/// Truncate to [`MAX_TOKENS`] and pad the rest with `pad_id`.
///
/// A truncated sequence still ends with the end-of-text token.
#[allow(clippy::cast_possible_wrap)]
fn pad_tokens(ids: &[u32], pad_id: u32) -> Vec<i32> {
    let mut padded: Vec<i32> = ids.iter().take(MAX_TOKENS).map(|&id| id as i32).collect();
    if ids.len() > MAX_TOKENS {
        padded[MAX_TOKENS - 1] = pad_id as i32;
    }
    padded.resize(MAX_TOKENS, pad_id as i32);
    padded
}
