//! Shared fakes for pipeline tests: a scripted surface and a map-backed fetcher.

#![allow(dead_code)]

use futures::future::BoxFuture;
use slidecap::error::{Error, Result};
use slidecap::loader::ScriptFetcher;
use slidecap::rendering::encode_png;
use slidecap::surface::{Clip, RenderSurface, ScriptResult, SurfaceConfig};
use slidecap::{CaptureConfig, Pipeline, SurfaceWorker, Viewport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Slide text that makes the fake surface refuse to capture
pub const FAIL_MARKER: &str = "FAIL_CAPTURE";

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Surface that records every call and paints a solid color derived from the
/// mounted document.
pub struct FakeSurface {
    log: CallLog,
    document: String,
}

impl FakeSurface {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            document: String::new(),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }
}

impl RenderSurface for FakeSurface {
    fn new(_config: SurfaceConfig) -> Result<Self> {
        Ok(Self::with_log(CallLog::default()))
    }

    fn mount(&mut self, html: &str) -> Result<()> {
        self.record("mount");
        self.document = html.to_string();
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.record(format!("navigate:{}", url));
        Ok(())
    }

    fn execute_script(&mut self, source: &str) -> Result<ScriptResult> {
        self.record(format!("exec:{}", source));
        if source.contains("throw") {
            return Ok(ScriptResult::thrown("Error: boom"));
        }
        Ok(ScriptResult::ok("undefined"))
    }

    fn evaluate(&mut self, _expression: &str) -> Result<ScriptResult> {
        self.record("evaluate");
        Ok(ScriptResult::ok("0"))
    }

    fn wait_for_fonts(&mut self, _timeout_ms: u64) -> Result<()> {
        self.record("fonts");
        Ok(())
    }

    fn element_clip(&mut self, _selector: &str) -> Result<Option<Clip>> {
        Ok(None)
    }

    fn capture_png(&mut self, clip: Clip) -> Result<Vec<u8>> {
        self.record("capture");
        if self.document.contains(FAIL_MARKER) {
            return Err(Error::RenderError("surface refused to paint".into()));
        }
        let (w, h) = clip.pixel_size();
        let shade = (self.document.len() % 251) as u8;
        let rgba: Vec<u8> = (0..w * h).flat_map(|_| [shade, 255 - shade, 128, 255]).collect();
        encode_png(w, h, &rgba)
    }

    fn reset(&mut self) -> Result<()> {
        self.record("reset");
        self.document.clear();
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

/// Fetcher serving fixed bodies, each after its own delay
#[derive(Default)]
pub struct MapFetcher {
    bodies: HashMap<String, (String, u64)>,
}

impl MapFetcher {
    pub fn with(mut self, url: &str, body: &str, delay_ms: u64) -> Self {
        self.bodies.insert(url.to_string(), (body.to_string(), delay_ms));
        self
    }
}

impl ScriptFetcher for MapFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            match self.bodies.get(url) {
                Some((body, delay)) => {
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    Ok(body.clone())
                }
                None => Err(Error::NetworkError("HTTP 404".into())),
            }
        })
    }
}

/// Small, fast configuration for fake-surface runs
pub fn fast_config() -> CaptureConfig {
    CaptureConfig {
        viewport: Viewport { width: 16, height: 9 },
        scale: 1.0,
        settle_delay_ms: 0,
        font_timeout_ms: 10,
        script_timeout_ms: 500,
        ..Default::default()
    }
}

/// Pipeline over a fake surface; returns the shared call log too
pub async fn fake_pipeline(config: CaptureConfig, fetcher: MapFetcher) -> (Pipeline, CallLog) {
    let log = CallLog::default();
    let surface_log = log.clone();
    let worker = SurfaceWorker::spawn(move || Ok(FakeSurface::with_log(surface_log)))
        .await
        .expect("spawn fake surface");
    let pipeline = Pipeline::new(config, worker, Arc::new(fetcher)).expect("pipeline");
    (pipeline, log)
}

pub fn executed(log: &CallLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|c| c.strip_prefix("exec:").map(str::to_string))
        .collect()
}
