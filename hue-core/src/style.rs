use serde::{Deserialize, Serialize};

/// Art styles offered by the style selector.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Style {
    Realism,
    Watercolor,
    Cyberpunk,
    Anime,
    #[serde(rename = "Oil Painting")]
    OilPainting,
}

serde_plain::derive_display_from_serialize!(Style);
serde_plain::derive_fromstr_from_deserialize!(Style);

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Realism,
        Style::Watercolor,
        Style::Cyberpunk,
        Style::Anime,
        Style::OilPainting,
    ];

    /// The label in the lowercase form used inside prompts and captions.
    pub fn lowercase(&self) -> String {
        self.to_string().to_lowercase()
    }

    /// Suffix appended to the user prompt, e.g. `", in watercolor style"`.
    pub fn suffix(&self) -> String {
        format!(", in {} style", self.lowercase())
    }
}
