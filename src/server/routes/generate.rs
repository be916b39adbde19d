//! Plate generation endpoint.

use std::str::FromStr;
use std::sync::PoisonError;

use axum::{
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::composite::{process_plate, Placement};
use crate::error::{Error, Result};
use crate::image::{decode_image, encode_png};
use crate::pipeline::{GenerationParams, DEFAULT_PROMPT, NEGATIVE_PROMPT};
use crate::server::error::ApiError;
use crate::server::state::SharedState;

/// Fields of a `POST /generate` multipart form.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateForm {
    /// Raw bytes of the uploaded plate crop.
    pub file: Vec<u8>,
    pub prompt: String,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub scale: f64,
    pub steps: i64,
    pub guidance: f32,
    pub seed: i64,
}

impl GenerateForm {
    /// Form with the given file and every other field at its default.
    #[must_use]
    pub fn with_file(file: Vec<u8>) -> Self {
        Self {
            file,
            prompt: DEFAULT_PROMPT.to_string(),
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale: 1.0,
            steps: 30,
            guidance: 7.5,
            seed: 42,
        }
    }

    /// Read the form from a multipart body. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed body, a missing `file`,
    /// or a field that does not parse.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        let mut file = None;
        let mut form = Self::with_file(Vec::new());

        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                file = Some(field.bytes().await.map_err(form_error)?.to_vec());
                continue;
            }

            let text = field.text().await.map_err(form_error)?;
            match name.as_str() {
                "prompt" => form.prompt = text,
                "x" => form.x = parse_field(&name, &text)?,
                "y" => form.y = parse_field(&name, &text)?,
                "rotation" => form.rotation = parse_field(&name, &text)?,
                "scale" => form.scale = parse_field(&name, &text)?,
                "steps" => form.steps = parse_field(&name, &text)?,
                "guidance" => form.guidance = parse_field(&name, &text)?,
                "seed" => form.seed = parse_field(&name, &text)?,
                other => tracing::debug!("Ignoring unknown form field '{other}'"),
            }
        }

        form.file = file.ok_or_else(|| Error::invalid("file", "field required"))?;
        Ok(form)
    }

    /// Placement parameters from the form.
    #[must_use]
    pub const fn placement(&self) -> Placement {
        Placement {
            rotation: self.rotation,
            translate_x: self.x,
            translate_y: self.y,
            scale: self.scale,
        }
    }

    /// Generation parameters from the form, with full strength and the fixed negative prompt.
    ///
    /// Negative seeds wrap into the unsigned range.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `steps` is not a positive 32-bit count.
    #[allow(clippy::cast_sign_loss)]
    pub fn generation_params(&self) -> Result<GenerationParams> {
        let steps = u32::try_from(self.steps)
            .ok()
            .filter(|&steps| steps > 0)
            .ok_or_else(|| Error::invalid("steps", "must be a positive integer"))?;

        Ok(GenerationParams {
            prompt: self.prompt.clone(),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            steps,
            guidance: self.guidance,
            strength: 1.0,
            seed: self.seed as u64,
        })
    }
}

/// POST /generate - Composite the uploaded plate and inpaint the scene around it
pub async fn generate(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    if !state.model.is_loaded() {
        return Err(Error::ModelUnavailable.into());
    }

    let form = GenerateForm::from_multipart(multipart).await?;
    let placement = form.placement();
    let params = form.generation_params()?;

    let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let crop = decode_image(&form.file)?;
        let slot = state.model.get().ok_or(Error::ModelUnavailable)?;
        let mut model = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let output = process_plate(&mut **model, &crop, &placement, &params)?;
        encode_png(&output)
    })
    .await
    .map_err(|err| Error::Worker {
        reason: err.to_string(),
    })??;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

fn parse_field<T: FromStr>(name: &str, text: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    text.trim()
        .parse()
        .map_err(|err: T::Err| Error::invalid(name, format!("'{text}': {err}")))
}

fn form_error(err: axum::extract::multipart::MultipartError) -> Error {
    Error::invalid("form", err.body_text())
}
