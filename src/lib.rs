//! # `plate-inpaint`
//!
//! Composites a cropped license-plate image onto a synthesized scene and
//! inpaints the scene around it with a Stable Diffusion inpainting model.
//!
//! The plate is resized, rotated and placed on a gray 512x512 canvas. A mask
//! marks everything except the plate silhouette for regeneration, the model
//! fills it in, and the plate is pasted back on top so its pixels are never
//! changed by the model.
//!
//! ## Example
//!
//! ```no_run
//! use plate_inpaint::composite::{process_plate, Placement};
//! use plate_inpaint::pipeline::{Config, GenerationParams, InpaintPipeline};
//!
//! # fn main() -> plate_inpaint::Result<()> {
//! let mut pipeline = InpaintPipeline::new(Config::default())?;
//! let crop = image::open("plate.png").expect("readable crop");
//!
//! let placement = Placement {
//!     rotation: 10.0,
//!     ..Placement::default()
//! };
//! let output = process_plate(&mut pipeline, &crop, &placement, &GenerationParams::default())?;
//! output.save("scene.png").expect("writable output");
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod server;

pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Config, InpaintPipeline, Inpainter};
