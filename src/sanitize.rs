//! Script sanitization.
//!
//! Two policies are available and must be chosen explicitly:
//! - [`SanitizePolicy::Strict`] removes every script and inline handler.
//! - [`SanitizePolicy::Allowlist`] keeps external scripts served from trusted
//!   hosts and inline scripts that match none of the dangerous patterns.

use crate::document::{Document, Element};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

/// Hosts (optionally with a path prefix) that external scripts may come from
pub const DEFAULT_TRUSTED_HOSTS: [&str; 9] = [
    "cdnjs.cloudflare.com",
    "cdn.jsdelivr.net",
    "unpkg.com",
    "code.jquery.com",
    "d3js.org",
    "cdn.plot.ly",
    "cdn.bokeh.org",
    "www.gstatic.com/charts",
    "cdn.tailwindcss.com",
];

const DANGEROUS_PATTERNS: [&str; 10] = [
    r"(?i)document\.cookie",
    r"(?i)localStorage",
    r"(?i)sessionStorage",
    r"(?i)\.innerHTML\s*=",
    r"(?i)\beval\s*\(",
    // only the constructor; `function (` declarations are fine
    r"\bFunction\s*\(",
    r#"(?i)setTimeout\s*\(\s*['"`]"#,
    r#"(?i)setInterval\s*\(\s*['"`]"#,
    r"(?i)window\.location",
    r"(?i)document\.write",
];

/// Attributes that may carry a `javascript:` URL
const URL_ATTRIBUTES: [&str; 5] = ["href", "src", "action", "formaction", "xlink:href"];

fn dangerous_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DANGEROUS_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// True when `source` matches one of the dangerous-pattern heuristics
pub fn is_dangerous(source: &str) -> bool {
    dangerous_patterns().iter().any(|re| re.is_match(source))
}

/// Sanitization policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SanitizePolicy {
    /// Remove every script node and inline handler
    Strict,
    /// Keep scripts from trusted hosts and inline scripts without dangerous patterns
    Allowlist {
        #[serde(default = "default_trusted_hosts")]
        trusted_hosts: Vec<String>,
    },
}

fn default_trusted_hosts() -> Vec<String> {
    DEFAULT_TRUSTED_HOSTS.iter().map(|s| s.to_string()).collect()
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        SanitizePolicy::Allowlist {
            trusted_hosts: default_trusted_hosts(),
        }
    }
}

/// One removed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    ExternalScript { src: String },
    InlineScript { excerpt: String },
    Handler { element: String, attribute: String },
    JavascriptUrl { element: String, attribute: String },
}

/// What a sanitizer pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub removed: Vec<Removal>,
    pub kept_scripts: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Applies a [`SanitizePolicy`] to a parsed document
#[derive(Debug, Clone)]
pub struct Sanitizer {
    policy: SanitizePolicy,
    base_url: Option<Url>,
}

impl Sanitizer {
    pub fn new(policy: SanitizePolicy) -> Self {
        Self { policy, base_url: None }
    }

    /// Resolve relative script URLs against `base`. Unparseable bases are ignored.
    pub fn with_base_url(mut self, base: Option<&str>) -> Self {
        self.base_url = base.and_then(|b| Url::parse(b).ok());
        self
    }

    pub fn policy(&self) -> &SanitizePolicy {
        &self.policy
    }

    /// Remove unsafe script content from `doc` in place.
    pub fn sanitize(&self, doc: &mut Document) -> SanitizeReport {
        let mut report = SanitizeReport::default();

        doc.root_mut().retain_elements(&mut |el: &Element| {
            if el.name != "script" {
                return true;
            }
            let keep = self.keep_script(el, &mut report);
            if keep {
                report.kept_scripts += 1;
            }
            keep
        });

        doc.root_mut().for_each_element_mut(&mut |el: &mut Element| {
            self.scrub_attributes(el, &mut report);
        });

        log::debug!(
            "sanitizer kept {} script(s), removed {} item(s)",
            report.kept_scripts,
            report.removed.len()
        );
        report
    }

    fn keep_script(&self, el: &Element, report: &mut SanitizeReport) -> bool {
        let trusted_hosts = match &self.policy {
            SanitizePolicy::Strict => {
                let removal = match el.attr("src") {
                    Some(src) => Removal::ExternalScript { src: src.to_string() },
                    None => Removal::InlineScript { excerpt: excerpt(&el.text()) },
                };
                report.removed.push(removal);
                return false;
            }
            SanitizePolicy::Allowlist { trusted_hosts } => trusted_hosts,
        };

        // data blocks are never executed
        if !crate::script::is_executable(el) {
            return true;
        }

        if let Some(src) = el.attr("src") {
            if self.is_trusted(src, trusted_hosts) {
                log::debug!("keeping trusted script {}", src);
                return true;
            }
            log::warn!("removing untrusted script {}", src);
            report.removed.push(Removal::ExternalScript { src: src.to_string() });
            return false;
        }

        let source = el.text();
        if is_dangerous(&source) {
            log::warn!("removing inline script with dangerous pattern: {}", excerpt(&source));
            report.removed.push(Removal::InlineScript { excerpt: excerpt(&source) });
            return false;
        }
        true
    }

    fn scrub_attributes(&self, el: &mut Element, report: &mut SanitizeReport) {
        let strict = matches!(self.policy, SanitizePolicy::Strict);
        let element = el.name.clone();
        el.attrs.retain(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with("on") && (strict || is_dangerous(value)) {
                report.removed.push(Removal::Handler {
                    element: element.clone(),
                    attribute: name.clone(),
                });
                return false;
            }
            if URL_ATTRIBUTES.contains(&lower.as_str()) && is_javascript_url(value) {
                report.removed.push(Removal::JavascriptUrl {
                    element: element.clone(),
                    attribute: name.clone(),
                });
                return false;
            }
            true
        });
    }

    /// Domain-suffix match of `src` against `trusted_hosts`.
    pub fn is_trusted(&self, src: &str, trusted_hosts: &[String]) -> bool {
        let Some(url) = self.resolve(src) else {
            return false;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        trusted_hosts.iter().any(|entry| {
            let (entry_host, entry_path) = match entry.split_once('/') {
                Some((h, p)) => (h, Some(p)),
                None => (entry.as_str(), None),
            };
            let entry_host = entry_host.to_ascii_lowercase();
            let host_matches = host == entry_host
                || host
                    .strip_suffix(entry_host.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'));
            let path_matches = entry_path.map_or(true, |p| path_has_prefix(url.path(), p));
            host_matches && path_matches
        })
    }

    fn resolve(&self, src: &str) -> Option<Url> {
        let src = src.trim();
        if let Some(rest) = src.strip_prefix("//") {
            return Url::parse(&format!("https://{}", rest)).ok();
        }
        match Url::parse(src) {
            Ok(url) => Some(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.base_url.as_ref().and_then(|b| b.join(src).ok())
            }
            Err(_) => None,
        }
    }
}

// Prefix match on whole path segments: `charts` covers `charts/x.js`, not `chartsevil/x.js`
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.trim_start_matches('/').strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn is_javascript_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    compact.to_ascii_lowercase().starts_with("javascript:")
}

fn excerpt(source: &str) -> String {
    source.trim().chars().take(100).collect()
}
