use serde::{Deserialize, Serialize};

use crate::{ControlError, ControlSpec, GenerationRequest, SizePreset, SliderSpec, Style};

/// Raw values of the user-facing controls, as submitted by the page.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ControlValues {
    pub prompt: String,
    pub style: String,
    pub guidance_scale: f64,
    pub size: String,
    pub steps: usize,
}

impl ControlValues {
    /// The values the controls start out with.
    pub fn defaults(spec: &ControlSpec) -> Self {
        Self {
            prompt: String::new(),
            style: Style::Realism.to_string(),
            guidance_scale: spec.guidance_scale.default,
            size: spec.default_size.to_string(),
            steps: spec.steps.default,
        }
    }

    /// Checks the values against what the profile's controls allow and builds the request.
    pub fn resolve(&self, spec: &ControlSpec) -> Result<GenerationRequest, ControlError> {
        if self.prompt.trim().is_empty() {
            return Err(ControlError::EmptyPrompt);
        }
        let style: Style = self
            .style
            .parse()
            .map_err(|_| ControlError::UnknownStyle(self.style.clone()))?;
        let size: SizePreset = self.size.parse()?;
        if !spec.sizes.contains(&size) {
            return Err(ControlError::UnsupportedSize(size.to_string()));
        }
        check_guidance(self.guidance_scale, &spec.guidance_scale)?;
        check_steps(self.steps, &spec.steps)?;

        Ok(GenerationRequest {
            prompt: self.prompt.clone(),
            style,
            guidance_scale: self.guidance_scale,
            width: size.width,
            height: size.height,
            steps: self.steps,
        })
    }
}

fn check_guidance(value: f64, slider: &SliderSpec<f64>) -> Result<(), ControlError> {
    let ticks = (value - slider.min) / slider.step;
    let on_grid = (ticks - ticks.round()).abs() < 1e-6;
    if value.is_finite() && value >= slider.min && value <= slider.max && on_grid {
        Ok(())
    } else {
        Err(out_of_range("guidance scale", value, slider))
    }
}

fn check_steps(value: usize, slider: &SliderSpec<usize>) -> Result<(), ControlError> {
    if (slider.min..=slider.max).contains(&value) && (value - slider.min) % slider.step == 0 {
        Ok(())
    } else {
        Err(out_of_range("steps", value, slider))
    }
}

fn out_of_range<T: ToString>(name: &'static str, value: T, slider: &SliderSpec<T>) -> ControlError {
    ControlError::OutOfRange {
        name,
        value: value.to_string(),
        min: slider.min.to_string(),
        max: slider.max.to_string(),
        step: slider.step.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Profile;

    fn values(prompt: &str, style: &str, guidance_scale: f64, size: &str, steps: usize) -> ControlValues {
        ControlValues {
            prompt: prompt.to_string(),
            style: style.to_string(),
            guidance_scale,
            size: size.to_string(),
            steps,
        }
    }

    #[test]
    fn resolves_the_example_request() {
        let spec = ControlSpec::for_profile(Profile::Constrained);
        let request = values("A tree", "Watercolor", 7.5, "64x64", 5)
            .resolve(&spec)
            .unwrap();
        assert_eq!(
            request,
            GenerationRequest {
                prompt: "A tree".to_string(),
                style: Style::Watercolor,
                guidance_scale: 7.5,
                width: 64,
                height: 64,
                steps: 5,
            }
        );
    }

    #[test]
    fn defaults_resolve_once_a_prompt_is_given() {
        for profile in [Profile::Standard, Profile::Constrained] {
            let spec = ControlSpec::for_profile(profile);
            let mut values = ControlValues::defaults(&spec);
            assert_eq!(values.resolve(&spec), Err(ControlError::EmptyPrompt));
            values.prompt = "A futuristic city at sunset".to_string();
            assert!(values.resolve(&spec).is_ok());
        }
    }

    #[test]
    fn rejects_values_the_controls_do_not_offer() {
        let spec = ControlSpec::for_profile(Profile::Standard);
        assert_eq!(
            values("x", "Pointillism", 7.5, "256x256", 30).resolve(&spec),
            Err(ControlError::UnknownStyle("Pointillism".to_string()))
        );
        assert_eq!(
            values("x", "Anime", 7.5, "64x64", 30).resolve(&spec),
            Err(ControlError::UnsupportedSize("64x64".to_string()))
        );
        assert!(matches!(
            values("x", "Anime", 7.5, "big", 30).resolve(&spec),
            Err(ControlError::InvalidSize(_))
        ));
        assert!(matches!(
            values("x", "Anime", 25.0, "256x256", 30).resolve(&spec),
            Err(ControlError::OutOfRange { name: "guidance scale", .. })
        ));
        assert!(matches!(
            values("x", "Anime", 7.5, "256x256", 32).resolve(&spec),
            Err(ControlError::OutOfRange { name: "steps", .. })
        ));
        assert!(matches!(
            values("x", "Anime", 7.5, "256x256", 105).resolve(&spec),
            Err(ControlError::OutOfRange { name: "steps", .. })
        ));
    }

    #[test]
    fn guidance_must_sit_on_the_slider_grid() {
        let spec = ControlSpec::for_profile(Profile::Constrained);
        assert!(values("x", "Anime", 7.25, "64x64", 5).resolve(&spec).is_err());
        assert!(values("x", "Anime", 7.0, "64x64", 5).resolve(&spec).is_ok());
        assert!(values("x", "Anime", f64::NAN, "64x64", 5).resolve(&spec).is_err());
    }
}
