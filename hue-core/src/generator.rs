use std::time::Instant;

use image::{DynamicImage, GenericImageView};

use crate::{
    prompting::{caption, compose_prompt},
    ControlSpec, GenerationError, GenerationRequest, GenerationResult, InferenceParams, Loader,
    Pipeline, PipelineCell, RunPermit, Session,
};

/// Turns generation requests into session results.
///
/// The pipeline is loaded on the first request and shared by every session afterwards.
pub struct Generator<L: Loader> {
    spec: ControlSpec,
    pipeline: PipelineCell<L>,
}

impl<L: Loader> Generator<L> {
    pub fn new(spec: ControlSpec, loader: L) -> Self {
        Self {
            spec,
            pipeline: PipelineCell::new(loader),
        }
    }

    pub fn spec(&self) -> &ControlSpec {
        &self.spec
    }

    pub fn pipeline(&self) -> &PipelineCell<L> {
        &self.pipeline
    }

    /// Runs one generation for `session`.
    ///
    /// On success the session's result is replaced. On failure the error is recorded as the
    /// session's last outcome and the previous result is left untouched.
    pub async fn generate(
        &self,
        session: &mut Session,
        request: GenerationRequest,
    ) -> Result<(), GenerationError> {
        let permit = session.begin()?;
        let outcome = self.run(request, permit).await;
        session.finish(outcome)
    }

    /// Produces the image and caption for `request` without touching any session.
    ///
    /// Callers sharing a session between tasks take the permit with [`Session::begin`], call
    /// this without holding the session, and commit with [`Session::finish`].
    pub async fn run(
        &self,
        request: GenerationRequest,
        permit: RunPermit,
    ) -> Result<GenerationResult, GenerationError> {
        let started = Instant::now();
        match self.produce(&request, permit).await {
            Ok(image) => {
                tracing::info!(
                    width = request.width,
                    height = request.height,
                    steps = request.steps,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generated image"
                );
                let caption = caption(self.spec.caption, request.style, &request.prompt);
                Ok(GenerationResult { image, caption })
            }
            Err(err) => {
                tracing::warn!(
                    kind = err.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation failed: {err}"
                );
                Err(err)
            }
        }
    }

    async fn produce(
        &self,
        request: &GenerationRequest,
        permit: RunPermit,
    ) -> Result<DynamicImage, GenerationError> {
        let pipeline = self.pipeline.get().await?;
        let params = InferenceParams {
            prompt: compose_prompt(&request.prompt, request.style, self.spec.prompt_budget),
            guidance_scale: request.guidance_scale,
            width: request.width,
            height: request.height,
            steps: request.steps,
        };
        tracing::debug!(prompt = %params.prompt, "invoking pipeline");

        // Inference never yields, so it runs on a blocking worker that the deadline can abandon.
        // The permit lives as long as the worker, so an abandoned run still counts against the
        // session.
        let worker = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let image = pipeline.run(&params);
            if let Err(e) = pipeline.release_memory() {
                tracing::warn!("failed to release pipeline memory: {e:#}");
            }
            image
        });
        let joined = match self.spec.deadline {
            Some(deadline) => tokio::time::timeout(deadline, worker)
                .await
                .map_err(|_| GenerationError::Timeout(deadline))?,
            None => worker.await,
        };
        let image = joined
            .map_err(|e| GenerationError::Inference(format!("generation worker failed: {e}")))?
            .map_err(|e| GenerationError::from_inference(&e))?;

        let (width, height) = image.dimensions();
        if (width as usize, height as usize) != (request.width, request.height) {
            return Err(GenerationError::Inference(format!(
                "pipeline returned a {width}x{height} image, expected {}x{}",
                request.width, request.height
            )));
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use image::GenericImageView;

    use super::*;
    use crate::{
        loader::testing::{Behavior, FakeLoader},
        Outcome, Profile, SessionStatus, Style,
    };

    fn request(prompt: &str, style: Style, size: usize, steps: usize) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            style,
            guidance_scale: 7.5,
            width: size,
            height: size,
            steps,
        }
    }

    fn constrained(loader: FakeLoader) -> Generator<FakeLoader> {
        Generator::new(ControlSpec::for_profile(Profile::Constrained), loader)
    }

    #[tokio::test]
    async fn watercolor_tree_example() {
        let loader = FakeLoader::new(Behavior::Solid);
        let generator = constrained(loader.clone());
        let mut session = Session::new();

        generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap();

        assert_eq!(
            loader.prompts.lock().unwrap().as_slice(),
            ["A tree, in watercolor style"]
        );
        let result = session.result().unwrap();
        assert_eq!(result.image.dimensions(), (64, 64));
        assert_eq!(result.caption, "A watercolor image of a tree with vivid details.");
        assert_eq!(session.last_outcome(), Some(&Outcome::Succeeded));
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn every_preset_and_step_count_yields_the_requested_size() {
        let generator = constrained(FakeLoader::new(Behavior::Solid));
        let spec = generator.spec().clone();
        let mut session = Session::new();
        for size in &spec.sizes {
            for steps in (spec.steps.min..=spec.steps.max).step_by(spec.steps.step) {
                let mut req = request("A lighthouse", Style::Realism, size.width, steps);
                req.height = size.height;
                generator.generate(&mut session, req).await.unwrap();
                let image = &session.result().unwrap().image;
                assert_eq!(image.dimensions(), (size.width as u32, size.height as u32));
            }
        }
    }

    #[tokio::test]
    async fn second_generation_replaces_the_first() {
        let generator = constrained(FakeLoader::new(Behavior::Solid));
        let mut session = Session::new();

        generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap();
        generator
            .generate(&mut session, request("A castle", Style::Anime, 128, 10))
            .await
            .unwrap();

        let result = session.result().unwrap();
        assert_eq!(result.caption, "A anime image of a castle with vivid details.");
        assert_eq!(result.image.dimensions(), (128, 128));
    }

    #[tokio::test]
    async fn pipeline_is_loaded_once_across_triggers() {
        let loader = FakeLoader::new(Behavior::Solid);
        let generator = constrained(loader.clone());
        let mut first = Session::new();
        let mut second = Session::new();

        generator
            .generate(&mut first, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap();
        generator
            .generate(&mut second, request("A boat", Style::Realism, 64, 5))
            .await
            .unwrap();

        assert_eq!(loader.loads(), 1);
        assert!(generator.pipeline().is_loaded());
    }

    #[tokio::test]
    async fn timeout_is_reported_and_keeps_the_previous_result() {
        let spec = ControlSpec::for_profile(Profile::Constrained)
            .with_deadline(Some(Duration::from_millis(50)));
        let ok = Generator::new(spec.clone(), FakeLoader::new(Behavior::Solid));
        let slow = Generator::new(spec, FakeLoader::new(Behavior::Hang(Duration::from_millis(500))));
        let mut session = Session::new();

        ok.generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap();
        let err = slow
            .generate(&mut session, request("A castle", Style::Anime, 64, 5))
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::Timeout(Duration::from_millis(50)));
        assert!(matches!(session.last_outcome(), Some(Outcome::TimedOut { .. })));
        assert_eq!(
            session.result().unwrap().caption,
            "A watercolor image of a tree with vivid details."
        );
        assert!(slow.pipeline().is_loaded());
    }

    #[tokio::test]
    async fn abandoned_run_keeps_the_session_busy_until_it_finishes() {
        let deadline = Duration::from_millis(50);
        let spec = ControlSpec::for_profile(Profile::Constrained).with_deadline(Some(deadline));
        let loader = FakeLoader::new(Behavior::Hang(Duration::from_millis(400)));
        let generator = Generator::new(spec, loader.clone());
        let mut session = Session::new();

        let err = generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Timeout(deadline));
        assert_eq!(session.status(), SessionStatus::Idle);

        for _ in 0..3 {
            let err = generator
                .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
                .await
                .unwrap_err();
            assert_eq!(err, GenerationError::Busy);
        }
        assert!(matches!(session.last_outcome(), Some(Outcome::TimedOut { .. })));
        assert_eq!(loader.prompts.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let err = generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Timeout(deadline));
        assert_eq!(loader.prompts.lock().unwrap().len(), 2);
        assert_eq!(loader.gauge.peak(), 1);
    }

    #[tokio::test]
    async fn sessions_run_side_by_side() {
        let loader = FakeLoader::new(Behavior::Hang(Duration::from_millis(200)));
        let generator = constrained(loader.clone());
        let mut first = Session::new();
        let mut second = Session::new();

        let (a, b) = tokio::join!(
            generator.generate(&mut first, request("A tree", Style::Watercolor, 64, 5)),
            generator.generate(&mut second, request("A boat", Style::Realism, 64, 5)),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(loader.gauge.peak(), 2);
    }

    #[tokio::test]
    async fn out_of_memory_is_resource_exhaustion() {
        let generator = constrained(FakeLoader::new(Behavior::OutOfMemory));
        let mut session = Session::new();
        let err = generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ResourceExhausted(_)));
        assert!(session.result().is_none());
    }

    #[tokio::test]
    async fn failures_and_panics_are_inference_errors() {
        for behavior in [Behavior::Fail, Behavior::Panic, Behavior::WrongSize] {
            let generator = constrained(FakeLoader::new(behavior));
            let mut session = Session::new();
            let err = generator
                .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
                .await
                .unwrap_err();
            assert!(
                matches!(err, GenerationError::Inference(_)),
                "{behavior:?} gave {err:?}"
            );
            assert_eq!(session.status(), SessionStatus::Idle);
        }
    }

    #[tokio::test]
    async fn construction_failure_is_reported_then_retried() {
        let mut loader = FakeLoader::new(Behavior::Solid);
        loader.fail_loads = 1;
        let generator = constrained(loader.clone());
        let mut session = Session::new();

        let err = generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "pipeline_construction");

        generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap();
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn memory_is_released_after_success_and_failure() {
        let loader = FakeLoader::new(Behavior::Fail);
        let generator = constrained(loader.clone());
        let mut session = Session::new();
        let _ = generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await;
        assert_eq!(loader.releases.load(Ordering::SeqCst), 1);

        let loader = FakeLoader::new(Behavior::Solid);
        let generator = constrained(loader.clone());
        generator
            .generate(&mut session, request("A tree", Style::Watercolor, 64, 5))
            .await
            .unwrap();
        assert_eq!(loader.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn standard_profile_does_not_truncate() {
        let loader = FakeLoader::new(Behavior::Solid);
        let generator = Generator::new(ControlSpec::for_profile(Profile::Standard), loader.clone());
        let long = "a".repeat(500);
        let mut session = Session::new();
        generator
            .generate(&mut session, request(&long, Style::Realism, 256, 30))
            .await
            .unwrap();
        assert_eq!(
            loader.prompts.lock().unwrap()[0],
            format!("{long}, in realism style")
        );
        assert!(session.result().unwrap().caption.starts_with("This image showcases"));
    }

    #[tokio::test]
    async fn constrained_profile_truncates_the_prompt() {
        let loader = FakeLoader::new(Behavior::Solid);
        let generator = constrained(loader.clone());
        let long = "b".repeat(500);
        let mut session = Session::new();
        generator
            .generate(&mut session, request(&long, Style::Realism, 64, 5))
            .await
            .unwrap();
        assert_eq!(
            loader.prompts.lock().unwrap()[0],
            format!("{}, in realism style", "b".repeat(200))
        );
    }
}
