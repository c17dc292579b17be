//! The rendering surface abstraction.
//!
//! A surface is one isolated, fixed-size rendering context. The capture
//! orchestrator only talks to this trait, so the Chrome backend can be
//! swapped for a scripted fake in tests.

use crate::error::Result;
use crate::Viewport;

/// Configuration for a rendering surface
///
/// ```
/// let cfg = slidecap::surface::SurfaceConfig::default();
/// assert_eq!(cfg.viewport.width, 1280);
/// ```
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Window size of the surface in CSS pixels
    pub viewport: Viewport,
    /// User agent reported by the surface
    pub user_agent: String,
    /// Whether to keep the browser sandbox enabled
    pub sandbox: bool,
    /// Forward page console output to the `slidecap::page` log target
    pub forward_console: bool,
    /// Timeout for navigation and single protocol calls in milliseconds
    pub timeout_ms: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            user_agent: concat!("slidecap/", env!("CARGO_PKG_VERSION")).to_string(),
            sandbox: true,
            forward_console: true,
            timeout_ms: 30_000,
        }
    }
}

/// Result of JavaScript execution
///
/// `value` is the serialized result of the evaluation. `is_error` indicates
/// whether the script threw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResult {
    pub value: String,
    pub is_error: bool,
}

impl ScriptResult {
    pub fn ok(value: impl Into<String>) -> Self {
        Self { value: value.into(), is_error: false }
    }

    pub fn thrown(value: impl Into<String>) -> Self {
        Self { value: value.into(), is_error: true }
    }
}

/// Console message emitted by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    /// Level such as "log", "warn", or "error"
    pub level: String,
    pub text: String,
}

impl ConsoleMessage {
    /// Forward to the `log` facade under the page target
    pub fn log(&self) {
        let level = match self.level.as_str() {
            "error" => log::Level::Error,
            "warn" => log::Level::Warn,
            "info" => log::Level::Info,
            "debug" => log::Level::Debug,
            _ => log::Level::Info,
        };
        log::log!(target: "slidecap::page", level, "{}", self.text);
    }
}

/// Rectangle to snapshot, in CSS pixels, rendered at `scale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl Clip {
    /// Clip covering `viewport` from the origin
    pub fn viewport(viewport: Viewport, scale: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: viewport.width as f64,
            height: viewport.height as f64,
            scale,
        }
    }

    /// Pixel dimensions of the resulting image
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.width * self.scale).round() as u32,
            (self.height * self.scale).round() as u32,
        )
    }
}

/// Core trait for rendering surface implementations
pub trait RenderSurface {
    /// Create a new surface with the given configuration
    fn new(config: SurfaceConfig) -> Result<Self>
    where
        Self: Sized;

    /// Replace the current document with `html` and wait for it to load
    fn mount(&mut self, html: &str) -> Result<()>;

    /// Navigate to `url` and wait for the load to finish
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Run a classic script in the page's global scope. A script that throws
    /// yields `Ok` with `is_error` set; `Err` is reserved for surface failures.
    fn execute_script(&mut self, source: &str) -> Result<ScriptResult>;

    /// Evaluate an expression, awaiting it when it returns a promise
    fn evaluate(&mut self, expression: &str) -> Result<ScriptResult>;

    /// Wait until web fonts are ready, at most `timeout_ms`
    fn wait_for_fonts(&mut self, timeout_ms: u64) -> Result<()>;

    /// Bounding box of the first element matching `selector`, if any
    fn element_clip(&mut self, selector: &str) -> Result<Option<Clip>>;

    /// Snapshot `clip` as PNG bytes
    fn capture_png(&mut self, clip: Clip) -> Result<Vec<u8>>;

    /// Drop the current document and everything it started
    fn reset(&mut self) -> Result<()>;

    /// Close the surface and release its resources
    fn close(self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_pixel_size_applies_scale() {
        let clip = Clip::viewport(Viewport { width: 1280, height: 720 }, 2.0);
        assert_eq!(clip.pixel_size(), (2560, 1440));
    }
}
