use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::ControlError;

/// Prompts offered by the sample selector.
pub const SAMPLE_PROMPTS: [&str; 5] = [
    "A mystical forest with glowing mushrooms",
    "A futuristic city at sunset",
    "A serene beach with pastel skies",
    "A steampunk airship in the clouds",
    "A dragon soaring over a medieval castle",
];

/// Deployment profile. `Constrained` targets small CPU-only hosts.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Standard,
    Constrained,
}

serde_plain::derive_display_from_serialize!(Profile);
serde_plain::derive_fromstr_from_deserialize!(Profile);

/// An image size preset, written `WxH`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct SizePreset {
    pub width: usize,
    pub height: usize,
}

impl SizePreset {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for SizePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for SizePreset {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ControlError::InvalidSize(s.to_string());
        let (width, height) = s.split_once('x').ok_or_else(invalid)?;
        let width = width.trim().parse().map_err(|_| invalid())?;
        let height = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for SizePreset {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SizePreset> for String {
    fn from(value: SizePreset) -> Self {
        value.to_string()
    }
}

/// Bounds of a slider control.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SliderSpec<T> {
    pub min: T,
    pub max: T,
    pub step: T,
    pub default: T,
}

/// Sentence pattern used for the description shown next to the image.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptionTemplate {
    /// "This image showcases a {style} depiction of {prompt}. ..."
    Showcase,
    /// "A {style} image of {prompt} with vivid details."
    Vivid,
}

/// Everything the controls and the generator need to know about a profile.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ControlSpec {
    pub profile: Profile,
    pub sizes: Vec<SizePreset>,
    pub default_size: SizePreset,
    pub guidance_scale: SliderSpec<f64>,
    pub steps: SliderSpec<usize>,
    /// Maximum number of prompt characters passed to the pipeline.
    pub prompt_budget: Option<usize>,
    #[serde(rename = "deadline_secs", serialize_with = "serialize_deadline")]
    pub deadline: Option<Duration>,
    #[serde(skip)]
    pub sliced_attention_size: Option<usize>,
    pub caption: CaptionTemplate,
}

fn serialize_deadline<S: serde::Serializer>(
    deadline: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    deadline.map(|d| d.as_secs()).serialize(serializer)
}

impl ControlSpec {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Standard => Self {
                profile,
                sizes: vec![SizePreset::new(256, 256), SizePreset::new(512, 512)],
                default_size: SizePreset::new(256, 256),
                guidance_scale: SliderSpec {
                    min: 1.0,
                    max: 20.0,
                    step: 0.1,
                    default: 7.5,
                },
                steps: SliderSpec {
                    min: 10,
                    max: 100,
                    step: 5,
                    default: 30,
                },
                prompt_budget: None,
                deadline: None,
                sliced_attention_size: None,
                caption: CaptionTemplate::Showcase,
            },
            Profile::Constrained => Self {
                profile,
                sizes: vec![
                    SizePreset::new(64, 64),
                    SizePreset::new(128, 128),
                    SizePreset::new(256, 256),
                ],
                default_size: SizePreset::new(128, 128),
                guidance_scale: SliderSpec {
                    min: 1.0,
                    max: 15.0,
                    step: 0.5,
                    default: 7.5,
                },
                steps: SliderSpec {
                    min: 5,
                    max: 50,
                    step: 5,
                    default: 20,
                },
                prompt_budget: Some(200),
                deadline: Some(Duration::from_secs(240)),
                sliced_attention_size: Some(1),
                caption: CaptionTemplate::Vivid,
            },
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}
