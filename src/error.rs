//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning markup into slide artifacts
#[derive(Error, Debug)]
pub enum Error {
    /// The input markup is structurally broken (unterminated tag, comment, ...)
    #[error("Failed to parse HTML: {message}")]
    Parse { message: String, input: String },

    /// No slide content was found in the input
    #[error("No slide elements found; make sure the markup contains elements with class=\"slide\" or a non-empty body")]
    NoSlides { input: String },

    /// An external script could not be fetched. Never fatal to a run.
    #[error("Failed to load script {url}: {message}")]
    ScriptLoad { url: String, message: String },

    /// A single slide could not be captured. Fatal to that slide only.
    #[error("Capture of slide {index} failed: {message}")]
    Capture { index: usize, message: String },

    /// Every slide failed, nothing to assemble
    #[error("No slides could be captured ({failed} failed)")]
    NoArtifacts { failed: usize },

    /// Failed to initialize the rendering surface
    #[error("Surface initialization failed: {0}")]
    InitializationError(String),

    /// Failed to render content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to execute JavaScript
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Zip archive could not be written
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// PDF document could not be written
    #[error("PDF error: {0}")]
    PdfError(String),

    /// The run was cancelled by the caller between slides
    #[error("Run cancelled after {completed} of {total} slides")]
    Cancelled { completed: usize, total: usize },

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Structural errors abort a run before any capture starts and carry the
    /// offending input so a corrected version can be requested.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        match self {
            Error::Parse { input, .. } | Error::NoSlides { input } => Some(Diagnostic {
                message: self.to_string(),
                input: input.clone(),
            }),
            _ => None,
        }
    }

    /// Whether the error stops the whole run (as opposed to one slide or one script)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::ScriptLoad { .. } | Error::Capture { .. })
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

/// Machine-usable bundle describing a structural failure: the error text and
/// the original input.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub input: String,
}

impl Diagnostic {
    /// Render a prompt that asks a correction step to repair the markup.
    pub fn correction_prompt(&self) -> String {
        format!(
            "The following HTML failed to render as slides.\n\n\
             [Error]\n{}\n\n\
             [How to fix]\n\
             - Make sure every slide is an element with class=\"slide\"\n\
             - Close every tag and fix mismatched nesting\n\
             - Remove unnecessary script tags\n\n\
             [HTML]\n{}",
            self.message, self.input
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_carry_a_diagnostic() {
        let err = Error::Parse {
            message: "unterminated <div> tag at line 3".into(),
            input: "<div".into(),
        };
        let diag = err.diagnostic().expect("parse errors carry a diagnostic");
        assert_eq!(diag.input, "<div");
        assert!(diag.message.contains("line 3"));
        assert!(diag.correction_prompt().ends_with("<div"));

        let slide_err = Error::Capture { index: 2, message: "tainted canvas".into() };
        assert!(slide_err.diagnostic().is_none());
        assert!(!slide_err.is_fatal());
        assert!(Error::NoArtifacts { failed: 3 }.is_fatal());
    }
}
