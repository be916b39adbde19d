//! ONNX Runtime inpainting pipeline.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ::image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{concatenate, s, Array1, Array3, Array4, Axis};
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{Error, Result};
use crate::image;
use crate::model::{
    detect_checkpoint, load_checkpoint_unet, select_device, DevicePreference, ExecutionDevice,
    ModelCache, ModelType, DEFAULT_MODEL_ID,
};

use super::guidance::{
    apply_guidance, combine_batched, downsample_mask, mask_image, uses_guidance,
};
use super::onnx::{extract_array4, missing_output};
use super::scheduler::DdimScheduler;
use super::text::PromptEncoder;
use super::vae::{self, LatentTensor};
use super::{InpaintRequest, Inpainter};

/// Element type the `UNet` graph expects for its `timestep` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestepType {
    /// `tensor(float)`, used by the diffusers ONNX exporter.
    #[default]
    Float32,
    /// `tensor(int64)`.
    Int64,
}

impl FromStr for TimestepType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "float32" | "f32" => Ok(Self::Float32),
            "int64" | "i64" => Ok(Self::Int64),
            other => Err(format!("unknown timestep type '{other}', expected float32 or int64")),
        }
    }
}

/// Configuration for loading the inpainting model.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the ONNX export of the model.
    pub model_url: String,

    /// URL of the CLIP `tokenizer.json`.
    pub tokenizer_url: String,

    /// Where downloaded files are cached. None for the platform cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Directory of a fine-tuned `UNet` that replaces the base one when present.
    pub checkpoint_dir: Option<PathBuf>,

    /// Requested execution device.
    pub device: DevicePreference,

    /// Element type of the `UNet` timestep input.
    pub timestep_type: TimestepType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_url: format!("https://huggingface.co/{DEFAULT_MODEL_ID}/resolve/onnx"),
            tokenizer_url:
                "https://huggingface.co/openai/clip-vit-base-patch32/resolve/main/tokenizer.json"
                    .to_string(),
            cache_dir: None,
            checkpoint_dir: Some(PathBuf::from("Models").join("diffusion")),
            device: DevicePreference::Auto,
            timestep_type: TimestepType::Float32,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a download URL is not http(s).
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("model_url", &self.model_url),
            ("tokenizer_url", &self.tokenizer_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::invalid(name, "must be an http(s) URL"));
            }
        }

        Ok(())
    }
}

/// Stable Diffusion inpainting on ONNX Runtime.
pub struct InpaintPipeline {
    config: Config,
    device: ExecutionDevice,
    /// Run the two guidance branches one at a time instead of as a batch of two.
    memory_saving: bool,
    text: PromptEncoder,
    unet: Session,
    vae_encoder: Session,
    vae_decoder: Session,
}

impl InpaintPipeline {
    /// Create a new pipeline with the given configuration.
    ///
    /// This will download models if they are not already cached. A fine-tuned
    /// `UNet` in `config.checkpoint_dir` replaces the base one; if it cannot be
    /// loaded the base `UNet` is used instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the base models cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing pipeline with config: {config:?}");

        let device = select_device(config.device);
        tracing::info!("Execution device: {device}");

        let cache = ModelCache::new(
            config.cache_dir.clone(),
            &config.model_url,
            &config.tokenizer_url,
        )?;

        tracing::info!("1. Loading base pipeline ({DEFAULT_MODEL_ID})...");
        let tokenizer_path = cache.get_model_path(ModelType::Tokenizer)?;
        let text_encoder = cache.load_session(ModelType::TextEncoder)?;
        let text = PromptEncoder::new(&tokenizer_path, text_encoder)?;
        let vae_encoder = cache.load_session(ModelType::VaeEncoder)?;
        let vae_decoder = cache.load_session(ModelType::VaeDecoder)?;

        let custom_unet = config.checkpoint_dir.as_deref().and_then(load_custom_unet);
        let unet = match custom_unet {
            Some(unet) => unet,
            None => cache.load_session(ModelType::Unet)?,
        };
        tracing::info!("Base pipeline OK");

        let memory_saving = device.is_accelerator();
        if memory_saving {
            tracing::info!("Memory-saving guidance enabled");
        }

        Ok(Self {
            config,
            device,
            memory_saving,
            text,
            unet,
            vae_encoder,
            vae_decoder,
        })
    }

    /// The device this pipeline runs on.
    #[must_use]
    pub const fn device(&self) -> ExecutionDevice {
        self.device
    }

    /// Noise prediction for one step, with classifier-free guidance applied.
    fn predict_noise(
        &mut self,
        latent_input: &Array4<f32>,
        timestep: usize,
        embeddings: &Array3<f32>,
        guidance: f32,
    ) -> Result<LatentTensor> {
        if !uses_guidance(guidance) {
            return self.run_unet(latent_input.clone(), timestep, embeddings.clone());
        }

        if self.memory_saving {
            let uncond = embeddings.slice(s![0..1, .., ..]).to_owned();
            let cond = embeddings.slice(s![1..2, .., ..]).to_owned();
            let noise_uncond = self.run_unet(latent_input.clone(), timestep, uncond)?;
            let noise_cond = self.run_unet(latent_input.clone(), timestep, cond)?;
            return Ok(apply_guidance(&noise_uncond, &noise_cond, guidance));
        }

        let batch = concatenate(Axis(0), &[latent_input.view(), latent_input.view()])
            .map_err(|err| shape_error("guidance batch", &err))?;
        let noise_pred = self.run_unet(batch, timestep, embeddings.clone())?;
        combine_batched(&noise_pred, guidance)
    }

    /// Run the `UNet` once.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn run_unet(
        &mut self,
        sample: Array4<f32>,
        timestep: usize,
        hidden_states: Array3<f32>,
    ) -> Result<LatentTensor> {
        let sample_value =
            Tensor::from_array(sample).map_err(|source| Error::Inference { source })?;

        let timestep_value: DynValue = match self.config.timestep_type {
            TimestepType::Float32 => Tensor::from_array(Array1::from_vec(vec![timestep as f32]))
                .map_err(|source| Error::Inference { source })?
                .into_dyn(),
            TimestepType::Int64 => Tensor::from_array(Array1::from_vec(vec![timestep as i64]))
                .map_err(|source| Error::Inference { source })?
                .into_dyn(),
        };

        let hidden_value =
            Tensor::from_array(hidden_states).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .unet
            .run(ort::inputs![
                "sample" => sample_value,
                "timestep" => timestep_value,
                "encoder_hidden_states" => hidden_value,
            ])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("noise prediction"))?;
        extract_array4(&output, "noise prediction")
    }
}

impl Inpainter for InpaintPipeline {
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage> {
        let params = request.params;
        params.validate()?;

        let scheduler = DdimScheduler::new(params.steps);
        let timesteps = scheduler.timesteps_for_strength(params.strength).to_vec();
        let Some(&first_timestep) = timesteps.first() else {
            return Err(Error::invalid(
                "strength",
                format!("{} leaves no steps out of {}", params.strength, params.steps),
            ));
        };

        let image_tensor = image::image_to_tensor(request.image);
        let mask = image::mask_to_tensor(request.mask);

        tracing::debug!("Encoding masked image...");
        let masked_latents = vae::encode(&mut self.vae_encoder, &mask_image(&image_tensor, &mask))?;
        let mask_latent = downsample_mask(&mask);

        let embeddings = if uses_guidance(params.guidance) {
            self.text.encode_pair(&params.negative_prompt, &params.prompt)?
        } else {
            self.text.encode(&params.prompt)?
        };

        let mut rng = rand::rngs::StdRng::seed_from_u64(params.seed);
        let noise: Array4<f32> =
            Array4::from_shape_fn(masked_latents.dim(), |_| rng.sample(StandardNormal));

        let mut latents = if params.strength >= 1.0 {
            noise * scheduler.init_noise_sigma()
        } else {
            let image_latents = vae::encode(&mut self.vae_encoder, &image_tensor)?;
            scheduler.add_noise(&image_latents, &noise, first_timestep)
        };

        let pb = ProgressBar::new(timesteps.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Denoising [{bar:40.cyan/blue}] {pos}/{len}")
                .expect("valid template")
                .progress_chars("#>-"),
        );

        for &timestep in &timesteps {
            let latent_input = concatenate(
                Axis(1),
                &[latents.view(), mask_latent.view(), masked_latents.view()],
            )
            .map_err(|err| shape_error("9-channel UNet input", &err))?;

            let noise_pred =
                self.predict_noise(&latent_input, timestep, &embeddings, params.guidance)?;
            latents = scheduler.step(&noise_pred, timestep, &latents);

            pb.inc(1);
        }

        pb.finish_with_message("Denoising complete");

        tracing::debug!("Decoding from latent space...");
        let output = vae::decode(&mut self.vae_decoder, &latents)?;
        Ok(image::tensor_to_image(&output))
    }
}

/// Try the fine-tuned `UNet` in `dir`, logging why it was skipped.
fn load_custom_unet(dir: &Path) -> Option<Session> {
    tracing::info!("2. Loading fine-tuned UNet from {}...", dir.display());

    let Some(format) = detect_checkpoint(dir) else {
        tracing::info!("No fine-tuned UNet found, running base model");
        return None;
    };

    tracing::info!("Detected custom model type: {format}");
    match load_checkpoint_unet(dir, format) {
        Ok(unet) => {
            tracing::info!("Custom UNet loaded successfully");
            Some(unet)
        }
        Err(err) => {
            tracing::error!("Error loading UNet, keeping base model: {err}");
            None
        }
    }
}

fn shape_error(what: &str, err: &ndarray::ShapeError) -> Error {
    Error::ShapeMismatch {
        expected: what.to_string(),
        actual: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert!(config.model_url.contains(DEFAULT_MODEL_ID));
        assert_eq!(
            config.checkpoint_dir,
            Some(PathBuf::from("Models").join("diffusion"))
        );
    }

    #[test]
    fn test_rejects_non_http_url() {
        let config = Config {
            model_url: "ftp://example.com/model".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_timestep_type() {
        assert_eq!("float32".parse::<TimestepType>(), Ok(TimestepType::Float32));
        assert_eq!("i64".parse::<TimestepType>(), Ok(TimestepType::Int64));
        assert!("f16".parse::<TimestepType>().is_err());
    }

    #[test]
    fn test_missing_checkpoint_keeps_base() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_custom_unet(&dir.path().join("missing")).is_none());
    }
}
