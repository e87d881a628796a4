use crate::{CaptionTemplate, Style};

/// Cuts `prompt` down to at most `budget` characters.
pub fn truncate_prompt(prompt: &str, budget: usize) -> &str {
    match prompt.char_indices().nth(budget) {
        Some((idx, _)) => &prompt[..idx],
        None => prompt,
    }
}

/// Builds the prompt handed to the pipeline: the (possibly truncated) user prompt
/// followed by the style suffix.
pub fn compose_prompt(prompt: &str, style: Style, budget: Option<usize>) -> String {
    let prompt = match budget {
        Some(budget) => truncate_prompt(prompt, budget),
        None => prompt,
    };
    format!("{prompt}{}", style.suffix())
}

/// Canned description of a generated image.
pub fn caption(template: CaptionTemplate, style: Style, prompt: &str) -> String {
    let style = style.lowercase();
    let prompt = prompt.to_lowercase();
    match template {
        CaptionTemplate::Vivid => format!("A {style} image of {prompt} with vivid details."),
        CaptionTemplate::Showcase => format!(
            "This image showcases a {style} depiction of {prompt}. The composition features \
             vibrant colors and intricate details, capturing the essence of the described scene."
        ),
    }
}
