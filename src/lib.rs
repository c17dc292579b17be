//! slidecap
//!
//! Turns a block of untrusted, script-bearing HTML into one fixed-size image
//! per slide, packed as a zip of PNGs or as a multi-page PDF.
//!
//! # Features
//!
//! - **CDP Backend** (default): renders through headless Chrome
//! - **Sanitization**: strict or allowlist script policies
//! - **Deterministic output**: stable slide order, fixed archive metadata
//!
//! # Example
//!
//! ```no_run
//! use slidecap::{CaptureConfig, OutputFormat, Pipeline};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CaptureConfig {
//!     format: OutputFormat::Pdf,
//!     ..Default::default()
//! };
//!
//! let pipeline = Pipeline::launch(config).await?;
//! let result = pipeline
//!     .run(r#"<div class="slide"><h1>One</h1></div><div class="slide"><h1>Two</h1></div>"#)
//!     .await?;
//! std::fs::write("deck.pdf", result.buffer())?;
//! println!("{}", result.message());
//! pipeline.close().await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub use error::{Diagnostic, Error, Result};

pub mod document;
pub mod extract;
pub mod sanitize;
pub mod script;

pub mod loader;
pub mod surface;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async facade over a surface owned by a worker thread
pub mod async_api;

pub mod assemble;
pub mod capture;
pub mod pipeline;
pub mod progress;
pub mod rendering;
pub mod server;
pub mod stage;

pub use assemble::{FailurePolicy, RunResult};
pub use async_api::SurfaceWorker;
pub use pipeline::{Cancellation, Pipeline};
pub use progress::{progress_channel, Progress};
pub use sanitize::SanitizePolicy;
pub use stage::LayeringStrategy;

/// Output container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Zip archive of `NNN.png` entries
    #[default]
    Png,
    /// One PDF page per slide
    Pdf,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "application/zip",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "zip",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Png => "png-archive",
            OutputFormat::Pdf => "pdf",
        })
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Configuration for a capture run
///
/// The defaults match a 16:9 deck at 2x: 1280×720 logical pixels, a 1.5s
/// settle delay after scripts, allowlist sanitization and lenient failure
/// handling. Every field can be omitted from a JSON config file.
///
/// The three delays are tunables, not guarantees: a script that draws after
/// `settle_delay_ms` is simply missed.
///
/// # Examples
///
/// ```
/// let cfg = slidecap::CaptureConfig::default();
/// assert_eq!(cfg.viewport.width, 1280);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub format: OutputFormat,
    /// Logical slide size in CSS pixels
    pub viewport: Viewport,
    /// Device pixel ratio of the snapshot
    pub scale: f64,
    /// Wait after scripts ran, before the snapshot
    pub settle_delay_ms: u64,
    /// Upper bound for `document.fonts.ready`
    pub font_timeout_ms: u64,
    /// Upper bound for each external script fetch
    pub script_timeout_ms: u64,
    pub sanitize: SanitizePolicy,
    /// Class marking slide elements
    pub slide_class: String,
    /// Surface and PDF page background (`#rrggbb`)
    pub background: String,
    pub layering: LayeringStrategy,
    pub failure_policy: FailurePolicy,
    /// Disable CSS animations and transitions in the surface
    pub freeze_animations: bool,
    /// Base for relative script URLs
    pub base_url: Option<String>,
    /// Keep Chrome's sandbox on
    pub sandbox: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            viewport: Viewport::default(),
            scale: 2.0,
            settle_delay_ms: 1500,
            font_timeout_ms: 2000,
            script_timeout_ms: 10_000,
            sanitize: SanitizePolicy::default(),
            slide_class: "slide".to_string(),
            background: "#ffffff".to_string(),
            layering: LayeringStrategy::default(),
            failure_policy: FailurePolicy::default(),
            freeze_animations: false,
            base_url: None,
            sandbox: true,
        }
    }
}

impl CaptureConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::ConfigError(format!("scale must be positive, got {}", self.scale)));
        }
        if self.slide_class.is_empty() || self.slide_class.contains(char::is_whitespace) {
            return Err(Error::ConfigError(format!("invalid slide class {:?}", self.slide_class)));
        }
        if let Some(base) = &self.base_url {
            url::Url::parse(base).map_err(|e| Error::ConfigError(format!("invalid base url {}: {}", base, e)))?;
        }
        Ok(())
    }

    /// Surface settings for this run
    pub fn surface_config(&self) -> surface::SurfaceConfig {
        surface::SurfaceConfig {
            viewport: self.viewport,
            sandbox: self.sandbox,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.viewport, Viewport { width: 1280, height: 720 });
        assert_eq!(config.scale, 2.0);
        assert_eq!(config.settle_delay_ms, 1500);
        assert_eq!(config.slide_class, "slide");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = CaptureConfig::from_json(
            r#"{"format":"pdf","viewport":{"width":1920,"height":1080},"sanitize":{"mode":"strict"},"layering":"utility-classes"}"#,
        )
        .unwrap();
        assert_eq!(config.format, OutputFormat::Pdf);
        assert_eq!(config.viewport.width, 1920);
        assert_eq!(config.sanitize, SanitizePolicy::Strict);
        assert_eq!(config.layering, LayeringStrategy::UtilityClasses);
        assert_eq!(config.settle_delay_ms, 1500);
    }

    #[test]
    fn validation_rejects_bad_geometry() {
        let zero = CaptureConfig {
            viewport: Viewport { width: 0, height: 720 },
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(Error::ConfigError(_))));

        let negative = CaptureConfig { scale: -1.0, ..Default::default() };
        assert!(negative.validate().is_err());

        assert!(CaptureConfig::from_json(r#"{"slide_class":"a b"}"#).is_err());
    }
}
