//! Per-slide capture orchestration.
//!
//! Each slide walks `Pending → ScriptsLoading → Settling → LayoutFixup →
//! Captured`, or drops to `CaptureFailed` from whichever phase broke. The
//! surface is reset after every attempt, whatever the outcome.

use crate::async_api::SurfaceWorker;
use crate::error::{Error, Result};
use crate::extract::{HeadContext, Slide};
use crate::loader::{LoadOutcome, ScriptLoader};
use crate::rendering::Screenshot;
use crate::script::{ExecutionPlan, ScriptSource};
use crate::stage::{LayeringStrategy, Stage};
use crate::surface::Clip;
use crate::Viewport;
use log::{debug, error, warn};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Pending,
    ScriptsLoading,
    Settling,
    LayoutFixup,
    Captured,
    CaptureFailed,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Captured | Self::CaptureFailed)
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::ScriptsLoading),
            Self::ScriptsLoading => Some(Self::Settling),
            Self::Settling => Some(Self::LayoutFixup),
            Self::LayoutFixup => Some(Self::Captured),
            Self::Captured | Self::CaptureFailed => None,
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::ScriptsLoading => "scripts-loading",
            Self::Settling => "settling",
            Self::LayoutFixup => "layout-fixup",
            Self::Captured => "captured",
            Self::CaptureFailed => "capture-failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one slide's capture attempt
#[derive(Debug)]
pub struct CaptureResult {
    pub index: usize,
    pub outcome: Result<Screenshot>,
    /// Non-fatal problems: failed script loads, scripts that threw
    pub warnings: Vec<Error>,
    /// Every state the attempt passed through, in order
    pub trace: Vec<CaptureState>,
}

impl CaptureResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn state(&self) -> CaptureState {
        self.trace.last().copied().unwrap_or(CaptureState::Pending)
    }
}

/// Timing and geometry of a capture
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub viewport: Viewport,
    pub scale: f64,
    pub settle_delay_ms: u64,
    pub font_timeout_ms: u64,
    pub layering: LayeringStrategy,
}

struct Attempt {
    index: usize,
    state: CaptureState,
    trace: Vec<CaptureState>,
    warnings: Vec<Error>,
}

impl Attempt {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: CaptureState::Pending,
            trace: vec![CaptureState::Pending],
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            debug!("slide {}: {} -> {}", self.index, self.state, next);
            self.state = next;
            self.trace.push(next);
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        debug!("slide {}: {} -> {}", self.index, self.state, CaptureState::CaptureFailed);
        let message = match err {
            Error::Capture { message, .. } => message,
            other => format!("{} (while {})", other, self.state),
        };
        self.state = CaptureState::CaptureFailed;
        self.trace.push(CaptureState::CaptureFailed);
        Error::Capture { index: self.index, message }
    }

    fn finish(self, outcome: Result<Screenshot>) -> CaptureResult {
        CaptureResult {
            index: self.index,
            outcome,
            warnings: self.warnings,
            trace: self.trace,
        }
    }
}

pub struct Capturer<'a> {
    worker: &'a SurfaceWorker,
    loader: &'a ScriptLoader,
    stage: &'a Stage,
    settings: &'a CaptureSettings,
}

impl<'a> Capturer<'a> {
    pub fn new(
        worker: &'a SurfaceWorker,
        loader: &'a ScriptLoader,
        stage: &'a Stage,
        settings: &'a CaptureSettings,
    ) -> Self {
        Self { worker, loader, stage, settings }
    }

    /// Capture `slide`. `head_loaded` holds the head externals fetched once
    /// for the run; their failures were already reported.
    pub async fn capture(&self, slide: &Slide, head: &HeadContext, head_loaded: &LoadOutcome) -> CaptureResult {
        let mut attempt = Attempt::new(slide.index);
        let outcome = self.run(&mut attempt, slide, head, head_loaded).await;

        // Teardown runs for every outcome
        if let Err(e) = self.worker.reset().await {
            warn!("slide {}: surface reset failed: {}", slide.index, e);
        }

        let outcome = outcome.map_err(|e| {
            let err = attempt.fail(e);
            error!("{}", err);
            err
        });
        attempt.finish(outcome)
    }

    async fn run(
        &self,
        attempt: &mut Attempt,
        slide: &Slide,
        head: &HeadContext,
        head_loaded: &LoadOutcome,
    ) -> Result<Screenshot> {
        let html = self.stage.document(head, slide);
        self.worker.mount(&html).await?;

        attempt.advance();
        let plan = ExecutionPlan::new(&head.scripts, &slide.scripts);
        let slide_loaded = self.loader.load(&plan.slide_externals).await;
        self.execute_plan(attempt, &plan, head_loaded, slide_loaded).await?;

        attempt.advance();
        if let Err(e) = self.worker.wait_for_fonts(self.settings.font_timeout_ms).await {
            debug!("slide {}: font wait failed: {}", slide.index, e);
        }
        if self.settings.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;
        }

        attempt.advance();
        if let Some(script) = self.stage.fixup_script(self.settings.layering) {
            match self.worker.evaluate(&script).await {
                Ok(res) if !res.is_error => debug!("slide {}: layering touched {} element(s)", slide.index, res.value),
                Ok(res) => attempt.warnings.push(Error::ScriptError(format!("layering fixup threw: {}", res.value))),
                Err(e) => attempt.warnings.push(Error::ScriptError(format!("layering fixup failed: {}", e))),
            }
        }

        let clip = Clip::viewport(self.settings.viewport, self.settings.scale);
        let png = self.worker.capture(clip).await?;
        let shot = Screenshot::from_png(png)?;
        let expected = clip.pixel_size();
        if (shot.width, shot.height) != expected {
            warn!(
                "slide {}: snapshot is {}x{}, expected {}x{}",
                slide.index, shot.width, shot.height, expected.0, expected.1
            );
        }

        attempt.advance();
        Ok(shot)
    }

    async fn execute_plan(
        &self,
        attempt: &mut Attempt,
        plan: &ExecutionPlan,
        head_loaded: &LoadOutcome,
        slide_loaded: LoadOutcome,
    ) -> Result<()> {
        attempt.warnings.extend(slide_loaded.failures);
        for script in plan.ordered() {
            let source = match &script.source {
                ScriptSource::External { url } => {
                    match head_loaded.get(url).or_else(|| slide_loaded.loaded.get(url).map(String::as_str)) {
                        Some(body) => body,
                        // already reported as a load failure
                        None => continue,
                    }
                }
                ScriptSource::Inline { source } => source.as_str(),
            };
            let result = self.worker.execute(source).await?;
            if result.is_error {
                warn!("slide {}: {} threw: {}", attempt.index, script.label(), result.value);
                attempt
                    .warnings
                    .push(Error::ScriptError(format!("{} threw: {}", script.label(), result.value)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_without_skipping() {
        let mut attempt = Attempt::new(1);
        for _ in 0..10 {
            attempt.advance();
        }
        assert_eq!(
            attempt.trace,
            vec![
                CaptureState::Pending,
                CaptureState::ScriptsLoading,
                CaptureState::Settling,
                CaptureState::LayoutFixup,
                CaptureState::Captured,
            ]
        );
        assert!(attempt.state.is_terminal());
    }

    #[test]
    fn failure_is_terminal_and_names_the_phase() {
        let mut attempt = Attempt::new(2);
        attempt.advance();
        attempt.advance();
        let err = attempt.fail(Error::RenderError("tainted canvas".into()));
        assert_eq!(attempt.state, CaptureState::CaptureFailed);
        assert_eq!(attempt.trace.last(), Some(&CaptureState::CaptureFailed));
        match err {
            Error::Capture { index, message } => {
                assert_eq!(index, 2);
                assert!(message.contains("tainted canvas"));
                assert!(message.contains("settling"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        attempt.advance();
        assert_eq!(attempt.state, CaptureState::CaptureFailed);
    }
}
