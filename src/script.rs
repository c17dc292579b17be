//! Script partitioning and execution ordering.

use crate::document::Element;

/// MIME types (lowercased, parameters stripped) that browsers execute as classic scripts
const JS_MIME_TYPES: [&str; 6] = [
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "text/ecmascript",
    "application/ecmascript",
    "module",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    External { url: String },
    Inline { source: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptScope {
    Head,
    Slide,
}

/// One executable script discovered in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRef {
    pub source: ScriptSource,
    /// Origin slide (1-based); `None` for head-level scripts
    pub slide: Option<usize>,
    pub scope: ScriptScope,
    /// Document order within its scope
    pub order: usize,
}

impl ScriptRef {
    pub fn is_external(&self) -> bool {
        matches!(self.source, ScriptSource::External { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match &self.source {
            ScriptSource::External { url } => Some(url),
            ScriptSource::Inline { .. } => None,
        }
    }

    /// Make a relative or protocol-relative URL absolute. Left untouched
    /// when it cannot be resolved.
    pub fn resolve(&mut self, base: Option<&url::Url>) {
        let ScriptSource::External { url: src } = &mut self.source else {
            return;
        };
        let resolved = match url::Url::parse(src) {
            Ok(_) => return,
            Err(_) if src.starts_with("//") => url::Url::parse(&format!("https:{}", src)).ok(),
            Err(_) => base.and_then(|b| b.join(src).ok()),
        };
        if let Some(resolved) = resolved {
            *src = resolved.to_string();
        }
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match &self.source {
            ScriptSource::External { url } => url.clone(),
            ScriptSource::Inline { .. } => format!("inline script #{}", self.order + 1),
        }
    }
}

/// Whether the `type` attribute of a `<script>` marks it executable
pub fn is_executable(script: &Element) -> bool {
    match script.attr("type") {
        None => true,
        Some(t) => {
            let t = t.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            t.is_empty() || JS_MIME_TYPES.contains(&t.as_str())
        }
    }
}

/// Remove every executable `<script>` from `content` and return them in
/// document order. Data blocks (`type="application/json"`, templates) stay in
/// the markup untouched.
pub fn partition(content: &mut Element, scope: ScriptScope, slide: Option<usize>) -> Vec<ScriptRef> {
    let mut scripts = Vec::new();
    let mut order = 0;
    content.retain_elements(&mut |el: &Element| {
        if el.name != "script" || !is_executable(el) {
            return true;
        }
        let source = match el.attr("src") {
            Some(src) if !src.trim().is_empty() => ScriptSource::External { url: src.trim().to_string() },
            _ => ScriptSource::Inline { source: el.text() },
        };
        scripts.push(ScriptRef { source, slide, scope, order });
        order += 1;
        false
    });
    scripts
}

/// Head-level external scripts of `head`, in document order. Inline head
/// scripts are not carried into slide captures.
pub fn head_externals(head: &Element) -> Vec<ScriptRef> {
    let mut copy = head.clone();
    partition(&mut copy, ScriptScope::Head, None)
        .into_iter()
        .filter(ScriptRef::is_external)
        .enumerate()
        .map(|(order, mut s)| {
            s.order = order;
            s
        })
        .collect()
}

/// Execution plan for one slide:
/// head externals → slide externals → slide inlines, each in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub head_externals: Vec<ScriptRef>,
    pub slide_externals: Vec<ScriptRef>,
    pub inlines: Vec<ScriptRef>,
}

impl ExecutionPlan {
    pub fn new(head: &[ScriptRef], slide: &[ScriptRef]) -> Self {
        let mut head_externals: Vec<ScriptRef> = head.iter().filter(|s| s.is_external()).cloned().collect();
        head_externals.sort_by_key(|s| s.order);

        let (mut slide_externals, mut inlines): (Vec<ScriptRef>, Vec<ScriptRef>) =
            slide.iter().cloned().partition(ScriptRef::is_external);
        slide_externals.sort_by_key(|s| s.order);
        inlines.sort_by_key(|s| s.order);

        Self { head_externals, slide_externals, inlines }
    }

    pub fn is_empty(&self) -> bool {
        self.head_externals.is_empty() && self.slide_externals.is_empty() && self.inlines.is_empty()
    }

    /// Scripts in execution order
    pub fn ordered(&self) -> impl Iterator<Item = &ScriptRef> {
        self.head_externals
            .iter()
            .chain(self.slide_externals.iter())
            .chain(self.inlines.iter())
    }
}
