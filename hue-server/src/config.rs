use std::{path::PathBuf, time::Duration};

use clap::Parser;
use hue_core::{ControlSpec, DeviceMap, Profile, StableDiffusionOptions};

// Define command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Hue text-to-image web UI")]
pub struct Args {
    /// Use an accelerator (CUDA or Metal) when one is available instead of the CPU
    #[arg(long)]
    pub gpu: bool,

    /// Accelerator ordinal used with --gpu
    #[arg(long, default_value_t = 0)]
    pub ordinal: usize,

    /// Hub repository of the Stable Diffusion model
    #[arg(long, default_value = "stable-diffusion-v1-5/stable-diffusion-v1-5")]
    pub model: String,

    /// Hub repository of the CLIP tokenizer
    #[arg(long, default_value = "openai/clip-vit-base-patch32")]
    pub tokenizer: String,

    /// Deployment profile: `standard` or `constrained`
    #[arg(long, default_value = "standard", value_parser = parse_profile)]
    pub profile: Profile,

    /// Generation deadline in seconds, overriding the profile's; 0 disables it
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Attention slice size, overriding the profile's; 0 disables slicing
    #[arg(long)]
    pub sliced_attention_size: Option<usize>,

    /// Load half precision weights (accelerators only)
    #[arg(long)]
    pub use_f16: bool,

    /// Hugging Face access token
    #[arg(long, env = "HUGGINGFACE_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Dotenv-style secret store consulted when no token is given
    #[arg(long, default_value = "secrets.env")]
    pub secrets_file: PathBuf,

    /// Load the model at startup instead of on the first generation
    #[arg(long)]
    pub preload: bool,

    /// Maximum number of live sessions; the oldest are dropped beyond it
    #[arg(long, default_value_t = 256)]
    pub max_sessions: usize,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8501)]
    pub port: u16,
}

fn parse_profile(s: &str) -> Result<Profile, String> {
    s.parse()
        .map_err(|_| format!("unknown profile {s:?}, expected `standard` or `constrained`"))
}

impl Args {
    pub fn control_spec(&self) -> ControlSpec {
        let mut spec = ControlSpec::for_profile(self.profile);
        if let Some(secs) = self.deadline_secs {
            spec = spec.with_deadline((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Some(size) = self.sliced_attention_size {
            spec.sliced_attention_size = (size > 0).then_some(size);
        }
        spec
    }

    pub fn pipeline_options(&self, spec: &ControlSpec) -> StableDiffusionOptions {
        StableDiffusionOptions {
            model_id: self.model.clone(),
            tokenizer_id: self.tokenizer.clone(),
            device_map: if self.gpu {
                DeviceMap::Ordinal(self.ordinal)
            } else {
                DeviceMap::ForceCpu
            },
            use_f16: self.use_f16,
            sliced_attention_size: spec.sliced_attention_size,
        }
    }
}
