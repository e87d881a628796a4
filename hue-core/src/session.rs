use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::GenerationError;

/// The picture currently shown to a session, together with its description.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub image: DynamicImage,
    pub caption: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Generating,
}

/// How the most recent generation ended.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { kind: &'static str, message: String },
    TimedOut { message: String },
}

impl Outcome {
    fn from_error(err: &GenerationError) -> Self {
        match err {
            GenerationError::Timeout(_) => Outcome::TimedOut {
                message: err.to_string(),
            },
            _ => Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Proof that a session's pipeline run may start.
///
/// Held by the blocking worker until inference returns, which can be long after a deadline has
/// already reported the run as timed out.
#[derive(Debug)]
pub struct RunPermit(OwnedSemaphorePermit);

/// State owned by one user session.
#[derive(Debug)]
pub struct Session {
    status: SessionStatus,
    last_outcome: Option<Outcome>,
    result: Option<GenerationResult>,
    runs: Arc<Semaphore>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: SessionStatus::default(),
            last_outcome: None,
            result: None,
            runs: Arc::new(Semaphore::new(1)),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    /// Marks the session as generating.
    ///
    /// Fails with `Busy` while a generation is in progress, or while the worker of a timed out
    /// run is still computing.
    pub fn begin(&mut self) -> Result<RunPermit, GenerationError> {
        if self.status == SessionStatus::Generating {
            return Err(GenerationError::Busy);
        }
        let permit = self
            .runs
            .clone()
            .try_acquire_owned()
            .map_err(|_| GenerationError::Busy)?;
        self.status = SessionStatus::Generating;
        Ok(RunPermit(permit))
    }

    /// Commits the outcome of the generation started by [`Session::begin`].
    ///
    /// A success replaces the current result as a whole. A failure is recorded as the last
    /// outcome and the current result, if any, stays in place.
    pub fn finish(
        &mut self,
        outcome: Result<GenerationResult, GenerationError>,
    ) -> Result<(), GenerationError> {
        self.status = SessionStatus::Idle;
        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.last_outcome = Some(Outcome::Succeeded);
                Ok(())
            }
            Err(err) => {
                self.last_outcome = Some(Outcome::from_error(&err));
                Err(err)
            }
        }
    }
}
