#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod controls;
pub mod device_map;
pub mod error;
pub mod generator;
pub mod loader;
pub mod profile;
pub mod prompting;
pub mod session;
pub mod style;
mod util;

mod stable_diffusion;

pub use controls::*;
pub use device_map::*;
pub use error::*;
pub use generator::*;
use image::DynamicImage;
pub use loader::*;
pub use profile::*;
pub use session::*;
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel, StableDiffusionOptions};
pub use style::*;
pub(crate) use util::*;

/// A single generation as requested by the user, after the controls have been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub style: Style,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
}

/// What the pipeline is actually invoked with.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceParams {
    pub prompt: String,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
}

pub trait Pipeline: Send + Sync {
    fn run(&self, params: &InferenceParams) -> anyhow::Result<DynamicImage>;

    /// Releases transient memory held on the compute device after a run.
    fn release_memory(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
