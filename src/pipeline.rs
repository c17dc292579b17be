//! One invocation: markup in, artifact buffer out.

use crate::assemble::{Assembler, FailurePolicy, RunResult};
use crate::async_api::SurfaceWorker;
use crate::capture::{CaptureSettings, Capturer};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::extract::{extract_slides, HeadContext, Slide};
use crate::loader::{ScriptFetcher, ScriptLoader};
use crate::progress::{ProgressObserver, ProgressReporter};
use crate::rendering::raster::parse_hex_color;
use crate::sanitize::{SanitizeReport, Sanitizer};
use crate::stage::Stage;
use crate::CaptureConfig;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation, checked between slides
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sanitized, extracted input ready for capture
#[derive(Debug, Clone)]
pub struct Prepared {
    pub slides: Vec<Slide>,
    pub head: HeadContext,
    pub report: SanitizeReport,
}

/// Parse, sanitize and extract `html` without touching a surface
pub fn prepare(config: &CaptureConfig, html: &str) -> Result<Prepared> {
    let mut doc = Document::parse(html);
    let report = Sanitizer::new(config.sanitize.clone())
        .with_base_url(config.base_url.as_deref())
        .sanitize(&mut doc);
    let (mut slides, mut head) = extract_slides(&doc, html, &config.slide_class)?;

    let base = config.base_url.as_deref().and_then(|b| url::Url::parse(b).ok());
    for script in head.scripts.iter_mut().chain(slides.iter_mut().flat_map(|s| s.scripts.iter_mut())) {
        script.resolve(base.as_ref());
    }
    Ok(Prepared { slides, head, report })
}

pub struct Pipeline {
    config: CaptureConfig,
    worker: SurfaceWorker,
    loader: ScriptLoader,
    cancel: Cancellation,
}

impl Pipeline {
    pub fn new(config: CaptureConfig, worker: SurfaceWorker, fetcher: Arc<dyn ScriptFetcher>) -> Result<Self> {
        config.validate()?;
        let loader = ScriptLoader::new(fetcher, config.script_timeout_ms);
        Ok(Self {
            config,
            worker,
            loader,
            cancel: Cancellation::default(),
        })
    }

    /// Launch headless Chrome and fetch scripts over HTTP
    #[cfg(feature = "cdp")]
    pub async fn launch(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let surface_config = config.surface_config();
        let fetcher = crate::loader::HttpFetcher::new(&surface_config.user_agent)?;
        let worker = SurfaceWorker::launch::<crate::cdp::CdpSurface>(surface_config).await?;
        Self::new(config, worker, Arc::new(fetcher))
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Token that stops the current (or next) run before its next slide.
    /// A cancel is consumed when that run ends.
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    pub fn prepare(&self, html: &str) -> Result<Prepared> {
        prepare(&self.config, html)
    }

    pub async fn run(&self, html: &str) -> Result<RunResult> {
        self.run_with_progress(html, None).await
    }

    /// Run with an observer receiving one event per completed slide
    pub async fn run_with_progress(&self, html: &str, observer: Option<ProgressObserver>) -> Result<RunResult> {
        let result = self.capture_all(html, observer).await;
        self.cancel.clear();
        result
    }

    async fn capture_all(&self, html: &str, observer: Option<ProgressObserver>) -> Result<RunResult> {
        let prepared = self.prepare(html).map_err(|e| {
            if e.diagnostic().is_some() {
                error!("input rejected: {}", e);
            }
            e
        })?;
        let Prepared { slides, head, report } = prepared;
        let total = slides.len();
        info!(
            "capturing {} slide(s) as {} ({} script(s) removed by the sanitizer)",
            total,
            self.config.format,
            report.removed.len()
        );

        let reporter = ProgressReporter::new(total, observer);
        let stage = Stage::new(
            self.config.viewport,
            self.config.background.clone(),
            self.config.freeze_animations,
        );
        let settings = CaptureSettings {
            viewport: self.config.viewport,
            scale: self.config.scale,
            settle_delay_ms: self.config.settle_delay_ms,
            font_timeout_ms: self.config.font_timeout_ms,
            layering: self.config.layering,
        };

        // Head externals are fetched once and replayed on every slide
        let mut head_loaded = self.loader.load(&head.scripts).await;
        let mut head_failures = std::mem::take(&mut head_loaded.failures);

        let capturer = Capturer::new(&self.worker, &self.loader, &stage, &settings);
        let mut results = Vec::with_capacity(total);
        for slide in &slides {
            if self.cancel.is_cancelled() {
                warn!("run cancelled after {} of {} slide(s)", results.len(), total);
                return Err(Error::Cancelled { completed: results.len(), total });
            }

            let mut result = capturer.capture(slide, &head, &head_loaded).await;
            if !head_failures.is_empty() {
                result.warnings.splice(0..0, head_failures.drain(..));
            }
            let failed = !result.is_success();
            reporter.advance();
            results.push(result);

            if failed && self.config.failure_policy == FailurePolicy::Strict {
                break;
            }
        }

        let background = parse_hex_color(&self.config.background).unwrap_or([255, 255, 255]);
        let page = (self.config.viewport.width as f64, self.config.viewport.height as f64);
        Assembler::new(self.config.format, page, background, self.config.failure_policy).assemble(results)
    }

    /// Close the surface worker
    pub async fn close(self) -> Result<()> {
        self.worker.close().await
    }
}
