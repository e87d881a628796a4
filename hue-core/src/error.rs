use std::time::Duration;

use thiserror::Error;

/// Why a generation did not produce an image.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error(
        "failed to load model {model}: {message}. If the model is gated, accept the license at \
         https://huggingface.co/{model} and set HUGGINGFACE_TOKEN"
    )]
    PipelineConstruction { model: String, message: String },

    #[error(
        "generation timed out after {}s; try a smaller image size or fewer steps",
        .0.as_secs()
    )]
    Timeout(Duration),

    #[error("ran out of memory during generation ({0}); try a smaller image size or fewer steps")]
    ResourceExhausted(String),

    #[error("error generating image: {0}")]
    Inference(String),

    #[error("a generation is already in progress for this session")]
    Busy,
}

impl GenerationError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::PipelineConstruction { .. } => "pipeline_construction",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::ResourceExhausted(_) => "resource_exhausted",
            GenerationError::Inference(_) => "inference",
            GenerationError::Busy => "busy",
        }
    }

    /// Classifies a failure returned by a pipeline run.
    pub fn from_inference(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let lower = message.to_lowercase();
        if lower.contains("out of memory") || lower.contains("memory allocation") {
            GenerationError::ResourceExhausted(message)
        } else {
            GenerationError::Inference(message)
        }
    }
}

/// A control value that the active profile does not allow.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("unknown style {0:?}")]
    UnknownStyle(String),

    #[error("invalid image size {0:?}, expected WxH")]
    InvalidSize(String),

    #[error("image size {0} is not offered by this deployment")]
    UnsupportedSize(String),

    #[error("{name} {value} is outside {min}..={max} or off the {step} step grid")]
    OutOfRange {
        name: &'static str,
        value: String,
        min: String,
        max: String,
        step: String,
    },
}
