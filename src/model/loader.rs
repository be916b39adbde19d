//! Model downloading and loading utilities.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use ort::session::Session;

use crate::error::{Error, Result};

/// Identifier of the base inpainting model.
pub const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-inpainting";

/// Files that make up the inpainting pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// CLIP text encoder.
    TextEncoder,
    /// CLIP tokenizer definition.
    Tokenizer,
    /// `UNet` - performs the denoising diffusion.
    Unet,
    /// VAE Encoder - encodes images to latent space.
    VaeEncoder,
    /// VAE Decoder - decodes latents to images.
    VaeDecoder,
}

impl ModelType {
    /// Path of this file relative to the model repository, also used inside the cache.
    #[must_use]
    pub const fn relative_path(&self) -> &'static str {
        match self {
            Self::TextEncoder => "text_encoder/model.onnx",
            Self::Tokenizer => "tokenizer/tokenizer.json",
            Self::Unet => "unet/model.onnx",
            Self::VaeEncoder => "vae_encoder/model.onnx",
            Self::VaeDecoder => "vae_decoder/model.onnx",
        }
    }

    /// Get the approximate size in bytes for progress indication.
    #[must_use]
    pub const fn approx_size(&self) -> u64 {
        match self {
            Self::TextEncoder => 492_000_000, // ~492 MB
            Self::Tokenizer => 2_200_000,     // ~2.2 MB
            Self::Unet => 1_500_000,          // graph only, weights are separate
            Self::VaeEncoder => 136_000_000,  // ~136 MB
            Self::VaeDecoder => 198_000_000,  // ~198 MB
        }
    }

    /// Relative path of the external weights file, for graphs that have one.
    /// Note: Must match the reference inside the ONNX graph.
    #[must_use]
    pub const fn data_relative_path(&self) -> Option<&'static str> {
        match self {
            Self::Unet => Some("unet/weights.pb"),
            Self::TextEncoder | Self::Tokenizer | Self::VaeEncoder | Self::VaeDecoder => None,
        }
    }

    /// Get the approximate size of the data file in bytes.
    #[must_use]
    pub const fn data_approx_size(&self) -> u64 {
        match self {
            Self::Unet => 3_440_000_000, // ~3.4 GB
            Self::TextEncoder | Self::Tokenizer | Self::VaeEncoder | Self::VaeDecoder => 0,
        }
    }
}

/// Manages the model cache directory and downloads.
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
    model_url: String,
    tokenizer_url: String,
}

impl ModelCache {
    /// Create a new model cache rooted at `cache_dir`.
    ///
    /// When `cache_dir` is `None` the platform cache directory is used:
    /// - Windows: `%LOCALAPPDATA%\plate-inpaint\models`
    /// - Linux: `~/.cache/plate-inpaint/models`
    /// - macOS: `~/Library/Caches/plate-inpaint/models`
    ///
    /// Files are fetched from `{model_url}/{relative_path}`, except the tokenizer,
    /// which comes from `tokenizer_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new(cache_dir: Option<PathBuf>, model_url: &str, tokenizer_url: &str) -> Result<Self> {
        let cache_dir = cache_dir.unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("plate-inpaint")
                .join("models")
        });

        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self {
            cache_dir,
            model_url: model_url.trim_end_matches('/').to_string(),
            tokenizer_url: tokenizer_url.to_string(),
        })
    }

    /// Directory the files are cached in.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download URL for a model file.
    #[must_use]
    pub fn url(&self, model_type: ModelType) -> String {
        match model_type {
            ModelType::Tokenizer => self.tokenizer_url.clone(),
            _ => format!("{}/{}", self.model_url, model_type.relative_path()),
        }
    }

    /// Get the path to a model file, downloading if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded or accessed.
    pub fn get_model_path(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.cache_dir.join(model_type.relative_path());

        if !path.exists() {
            download_file(
                &self.url(model_type),
                &path,
                model_type.relative_path(),
                model_type.approx_size(),
            )?;
        }

        // Download external data file if needed
        if let Some(data_relative) = model_type.data_relative_path() {
            let data_path = self.cache_dir.join(data_relative);
            if !data_path.exists() {
                download_file(
                    &format!("{}/{data_relative}", self.model_url),
                    &data_path,
                    data_relative,
                    model_type.data_approx_size(),
                )?;
            }
        }

        Ok(path)
    }

    /// Load an ONNX model session.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load_session(&self, model_type: ModelType) -> Result<Session> {
        let path = self.get_model_path(model_type)?;
        load_session(&path, model_type.relative_path())
    }
}

/// Load an ONNX session from a local file.
///
/// # Errors
///
/// Returns an error if the graph cannot be loaded.
pub fn load_session(path: &Path, name: &str) -> Result<Session> {
    Session::builder()
        .map_err(|source| Error::ModelLoad {
            name: name.to_string(),
            source,
        })?
        .commit_from_file(path)
        .map_err(|source| Error::ModelLoad {
            name: name.to_string(),
            source,
        })
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let client = reqwest::blocking::Client::builder()
        // The blocking client defaults to a 30s total timeout, too short for the UNet weights
        .timeout(Option::<std::time::Duration>::None)
        .build()
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;
    let mut response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let total_size = response.content_length().unwrap_or(approx_size);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    save_atomically(&mut response, path, &pb)?;
    pb.finish_with_message(format!("Downloaded {name}"));

    Ok(())
}

/// Stream `reader` into `path` through a temporary file, renamed once complete.
///
/// A failed transfer removes the temporary file.
fn save_atomically(reader: &mut impl Read, path: &Path, pb: &ProgressBar) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let written = stream_to_file(reader, &temp_path, pb);
    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            tracing::warn!("Failed to remove {}: {cleanup}", temp_path.display());
        }
        pb.abandon();
        return Err(err);
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn stream_to_file(reader: &mut impl Read, temp_path: &Path, pb: &ProgressBar) -> Result<()> {
    let mut file = fs::File::create(temp_path)?;

    let mut downloaded = 0u64;
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_join_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(
            Some(dir.path().to_path_buf()),
            "https://example.com/repo/",
            "https://example.com/tokenizer.json",
        )
        .unwrap();

        assert_eq!(
            cache.url(ModelType::Unet),
            "https://example.com/repo/unet/model.onnx"
        );
        assert_eq!(
            cache.url(ModelType::Tokenizer),
            "https://example.com/tokenizer.json"
        );
        assert_eq!(cache.cache_dir(), dir.path());
    }

    #[test]
    fn test_cached_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(
            Some(dir.path().to_path_buf()),
            "http://127.0.0.1:9",
            "http://127.0.0.1:9/tokenizer.json",
        )
        .unwrap();

        let tokenizer = dir.path().join(ModelType::Tokenizer.relative_path());
        fs::create_dir_all(tokenizer.parent().unwrap()).unwrap();
        fs::write(&tokenizer, "{}").unwrap();

        assert_eq!(cache.get_model_path(ModelType::Tokenizer).unwrap(), tokenizer);
    }

    /// Yields some bytes, then fails like a dropped connection.
    struct DroppedConnection {
        sent: bool,
    }

    impl Read for DroppedConnection {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"onnx");
            Ok(4)
        }
    }

    #[test]
    fn test_failed_transfer_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let mut reader = DroppedConnection { sent: false };

        let result = save_atomically(&mut reader, &path, &ProgressBar::hidden());

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_complete_transfer_lands_at_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let mut reader: &[u8] = b"graph bytes";

        save_atomically(&mut reader, &path, &ProgressBar::hidden()).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"graph bytes");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_only_unet_has_external_data() {
        assert_eq!(ModelType::Unet.data_relative_path(), Some("unet/weights.pb"));
        assert!(ModelType::VaeDecoder.data_relative_path().is_none());
    }
}
