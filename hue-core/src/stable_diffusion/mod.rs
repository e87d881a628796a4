use std::path::PathBuf;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;

use crate::{select_best_device, tensor_to_image, DeviceMap, InferenceParams, Loader, Pipeline};

const VAE_SCALE: f64 = 0.18215;
const LATENT_CHANNELS: usize = 4;
const PAD_TOKEN: &str = "<|endoftext|>";

#[derive(Debug, Clone)]
pub struct StableDiffusionOptions {
    /// Hub repository holding the unet, vae and text encoder weights.
    pub model_id: String,
    /// Hub repository holding the CLIP `tokenizer.json`.
    pub tokenizer_id: String,
    pub device_map: DeviceMap,
    /// Use half precision weights. Ignored on CPU.
    pub use_f16: bool,
    /// Attention slice size; trades speed for lower peak memory.
    pub sliced_attention_size: Option<usize>,
}

impl Default for StableDiffusionOptions {
    fn default() -> Self {
        Self {
            model_id: "stable-diffusion-v1-5/stable-diffusion-v1-5".to_string(),
            tokenizer_id: "openai/clip-vit-base-patch32".to_string(),
            device_map: DeviceMap::ForceCpu,
            use_f16: false,
            sliced_attention_size: None,
        }
    }
}

struct WeightFiles {
    unet: String,
    vae: String,
    clip: String,
}

impl WeightFiles {
    fn for_dtype(dtype: DType) -> Self {
        let suffix = if dtype == DType::F16 { ".fp16" } else { "" };
        Self {
            unet: format!("unet/diffusion_pytorch_model{suffix}.safetensors"),
            vae: format!("vae/diffusion_pytorch_model{suffix}.safetensors"),
            clip: format!("text_encoder/model{suffix}.safetensors"),
        }
    }
}

pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    clip: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionModel {
    fn build(
        options: &StableDiffusionOptions,
        device: Device,
        dtype: DType,
        tokenizer_file: PathBuf,
        clip_file: PathBuf,
        unet_file: PathBuf,
        vae_file: PathBuf,
    ) -> Result<Self> {
        let config = StableDiffusionConfig::v1_5(options.sliced_attention_size, None, None);

        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(PAD_TOKEN)
            .with_context(|| format!("tokenizer has no {PAD_TOKEN} token"))?;

        let clip = stable_diffusion::build_clip_transformer(&config.clip, clip_file, &device, dtype)
            .context("failed to load text encoder")?;
        let vae = config
            .build_vae(vae_file, &device, dtype)
            .context("failed to load vae")?;
        let unet = config
            .build_unet(
                unet_file,
                &device,
                LATENT_CHANNELS,
                cfg!(feature = "flash-attn"),
                dtype,
            )
            .context("failed to load unet")?;

        Ok(Self {
            device,
            dtype,
            config,
            tokenizer,
            pad_id,
            clip,
            unet,
            vae,
        })
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let max_len = self.config.clip.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        // CLIP only has positions for `max_len` tokens.
        tokens.truncate(max_len);
        tokens.resize(max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.clip.forward(&tokens)?)
    }
}

impl Pipeline for StableDiffusionModel {
    fn run(&self, params: &InferenceParams) -> Result<DynamicImage> {
        if params.width % 8 != 0 || params.height % 8 != 0 {
            anyhow::bail!(
                "image size must be divisible by 8, got {}x{}",
                params.width,
                params.height
            );
        }
        let use_guidance = params.guidance_scale > 1.0;
        let mut scheduler = self.config.build_scheduler(params.steps)?;

        // --- Text embeddings, with the unconditional embedding first when guiding ---
        let text_embeddings = self.encode_prompt(&params.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond_embeddings = self.encode_prompt("")?;
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?
        } else {
            text_embeddings
        };
        let text_embeddings = text_embeddings.to_dtype(self.dtype)?;

        // --- Denoise ---
        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, LATENT_CHANNELS, params.height / 8, params.width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;
        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let latent_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_input = scheduler.scale_model_input(latent_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&latent_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::debug!(step = index + 1, total = timesteps.len(), "denoised");
        }

        // --- Decode and convert to an 8-bit RGB image ---
        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let decoded = ((decoded.to_dtype(DType::F32)? / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (decoded.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }

    fn release_memory(&self) -> Result<()> {
        // Intermediate tensors are gone by now; wait for the device to actually free them.
        self.device.synchronize()?;
        Ok(())
    }
}

/// Fetches Stable Diffusion weights from the Hugging Face Hub.
pub struct StableDiffusionLoader {
    api: Api,
    options: StableDiffusionOptions,
}

impl StableDiffusionLoader {
    pub fn new(api: Api, options: StableDiffusionOptions) -> Self {
        Self { api, options }
    }

    pub fn options(&self) -> &StableDiffusionOptions {
        &self.options
    }
}

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    fn model_id(&self) -> &str {
        &self.options.model_id
    }

    async fn load(&self) -> Result<Self::Model> {
        // Configure device.
        let device =
            select_best_device(self.options.device_map).context("failed to set up device")?;
        let dtype = if self.options.use_f16 && !device.is_cpu() {
            DType::F16
        } else {
            DType::F32
        };
        tracing::info!(?device, ?dtype, "selected device");

        let files = WeightFiles::for_dtype(dtype);
        let repo = self
            .api
            .repo(hf_hub::Repo::model(self.options.model_id.clone()));
        let unet_file = repo
            .get(&files.unet)
            .await
            .context("failed to get unet weights")?;
        let vae_file = repo
            .get(&files.vae)
            .await
            .context("failed to get vae weights")?;
        let clip_file = repo
            .get(&files.clip)
            .await
            .context("failed to get text encoder weights")?;
        let tokenizer_file = self
            .api
            .model(self.options.tokenizer_id.clone())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;

        let options = self.options.clone();
        tokio::task::spawn_blocking(move || {
            StableDiffusionModel::build(
                &options,
                device,
                dtype,
                tokenizer_file,
                clip_file,
                unet_file,
                vae_file,
            )
        })
        .await
        .context("model loading worker failed")?
    }
}
