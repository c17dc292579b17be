//! Owned HTML document tree.
//!
//! Input markup is parsed with `scraper` (html5ever) and immediately copied
//! into plain owned values. Nothing in the resulting tree is shared, so a
//! cloned subtree can be mutated freely without touching the original parse.

use scraper::{ElementRef, Html, Node as HtmlNode};

/// Elements serialized without a closing tag
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose text content is emitted verbatim
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Elements that swallow everything up to their closing tag while tokenizing
const CONSUMING_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(pos).1)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_ascii_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Append `declarations` to the inline `style` attribute.
    pub fn push_style(&mut self, declarations: &str) {
        let merged = match self.attr("style") {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{};{}", existing.trim().trim_end_matches(';'), declarations)
            }
            _ => declarations.to_string(),
        };
        self.set_attr("style", merged);
    }

    /// Direct child elements
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated text of all descendant text nodes
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// True when the element has no child elements and only whitespace text
    pub fn is_blank(&self) -> bool {
        self.children.iter().all(|n| match n {
            Node::Element(_) => false,
            Node::Text(t) => t.trim().is_empty(),
            Node::Comment(_) => true,
        })
    }

    /// Pre-order search, including `self`.
    pub fn find(&self, pred: &impl Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find(pred))
    }

    /// All elements (including `self`) carrying `class`, in document order.
    pub fn select_class<'a>(&'a self, class: &str, out: &mut Vec<&'a Element>) {
        if self.has_class(class) {
            out.push(self);
        }
        for child in self.child_elements() {
            child.select_class(class, out);
        }
    }

    /// Visit `self` and every descendant element in document order.
    pub fn for_each_element_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        f(self);
        for child in self.children.iter_mut() {
            if let Node::Element(e) = child {
                e.for_each_element_mut(&mut *f);
            }
        }
    }

    /// Drop every descendant element for which `keep` returns false, together
    /// with its subtree. Survivors are visited in document order.
    pub fn retain_elements(&mut self, keep: &mut impl FnMut(&Element) -> bool) {
        let mut kept = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match child {
                Node::Element(mut e) => {
                    if keep(&e) {
                        e.retain_elements(&mut *keep);
                        kept.push(Node::Element(e));
                    }
                }
                other => kept.push(other),
            }
        }
        self.children = kept;
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        let raw = RAW_TEXT_ELEMENTS.contains(&self.name.as_str());
        for child in &self.children {
            write_node(child, raw, &mut out);
        }
        out
    }
}

fn collect_text(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
            Node::Comment(_) => {}
        }
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        escape_into(v, true, out);
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&el.name.as_str()) {
        return;
    }
    let raw = RAW_TEXT_ELEMENTS.contains(&el.name.as_str());
    for child in &el.children {
        write_node(child, raw, out);
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn write_node(node: &Node, raw: bool, out: &mut String) {
    match node {
        Node::Element(e) => write_element(e, out),
        Node::Text(t) if raw => out.push_str(t),
        Node::Text(t) => escape_into(t, false, out),
        Node::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c);
            out.push_str("-->");
        }
    }
}

fn escape_into(s: &str, attr: bool, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' if attr => out.push_str("&quot;"),
            '<' if !attr => out.push_str("&lt;"),
            '>' if !attr => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

/// A parsed input document
#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
    parse_error: Option<String>,
    notes: Vec<String>,
}

impl Document {
    /// Parse `input`. Never fails: structural damage is recorded as the
    /// parse-error marker and surfaced by slide extraction.
    pub fn parse(input: &str) -> Self {
        let html = Html::parse_document(input);
        let notes = html.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>();
        let root = convert_element(html.root_element());

        let parse_error = find_unterminated(input).or_else(|| {
            root.find(&|e: &Element| e.name == "parsererror")
                .map(|e| format!("parser error reported in markup: {}", e.text().trim()))
        });

        if !notes.is_empty() {
            log::debug!("html parser recovered from {} issue(s)", notes.len());
        }

        Self { root, parse_error, notes }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn head(&self) -> Option<&Element> {
        self.root.child_elements().find(|e| e.name == "head")
    }

    pub fn body(&self) -> Option<&Element> {
        self.root.child_elements().find(|e| e.name == "body")
    }

    /// Human-readable description of the structural damage, if any
    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    pub fn has_parse_error(&self) -> bool {
        self.parse_error.is_some()
    }

    /// Recoverable issues reported by the HTML parser
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

fn convert_element(el: ElementRef) -> Element {
    let value = el.value();
    let mut out = Element {
        name: value.name().to_string(),
        attrs: value
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        children: Vec::new(),
    };
    for child in el.children() {
        match child.value() {
            HtmlNode::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    out.children.push(Node::Element(convert_element(child_el)));
                }
            }
            HtmlNode::Text(t) => out.children.push(Node::Text(String::from(&**t))),
            HtmlNode::Comment(c) => out.children.push(Node::Comment(String::from(&**c))),
            _ => {}
        }
    }
    out
}

/// Scan raw markup for constructs that never terminate before end of input.
fn find_unterminated(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let start = i;
        let rest = &bytes[i + 1..];

        if rest.starts_with(b"!--") {
            match find_bytes(bytes, i + 4, b"-->", false) {
                Some(end) => {
                    i = end + 3;
                    continue;
                }
                None => {
                    return Some(format!(
                        "unterminated comment starting at line {}",
                        line_of(input, start)
                    ))
                }
            }
        }

        if matches!(rest.first(), Some(b'!') | Some(b'?')) {
            match find_bytes(bytes, i + 1, b">", false) {
                Some(end) => {
                    i = end + 1;
                    continue;
                }
                None => {
                    return Some(format!(
                        "unterminated markup declaration at line {}",
                        line_of(input, start)
                    ))
                }
            }
        }

        let closing = rest.first() == Some(&b'/');
        let name_start = i + 1 + usize::from(closing);
        if !bytes.get(name_start).is_some_and(|b| b.is_ascii_alphabetic()) {
            // A stray `<` in text content
            i += 1;
            continue;
        }
        let mut name_end = name_start;
        while name_end < bytes.len()
            && (bytes[name_end].is_ascii_alphanumeric() || matches!(bytes[name_end], b'-' | b':'))
        {
            name_end += 1;
        }
        let name = input[name_start..name_end].to_ascii_lowercase();

        let Some(end) = find_tag_end(bytes, name_end) else {
            return Some(format!(
                "unterminated <{}{}> tag at line {}",
                if closing { "/" } else { "" },
                name,
                line_of(input, start)
            ));
        };
        i = end + 1;

        let self_closing = end > 0 && bytes[end - 1] == b'/';
        if !closing && !self_closing && CONSUMING_ELEMENTS.contains(&name.as_str()) {
            let close = format!("</{}", name);
            match find_bytes(bytes, i, close.as_bytes(), true) {
                // the closing tag itself is checked on the next iteration
                Some(pos) => i = pos,
                None => {
                    return Some(format!(
                        "<{}> element opened at line {} is never closed",
                        name,
                        line_of(input, start)
                    ))
                }
            }
        }
    }
    None
}

/// Position of the `>` closing a tag whose name ends at `from`. Quotes only
/// delimit attribute values when they follow `=`.
fn find_tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut after_equals = false;
    for (k, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'>' => return Some(k),
                b'"' | b'\'' if after_equals => quote = Some(b),
                b'=' => {
                    after_equals = true;
                    continue;
                }
                ws if ws.is_ascii_whitespace() => continue,
                _ => {}
            },
        }
        after_equals = false;
    }
    None
}

fn find_bytes(haystack: &[u8], from: usize, needle: &[u8], ignore_case: bool) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| {
            if ignore_case {
                w.eq_ignore_ascii_case(needle)
            } else {
                w == needle
            }
        })
        .map(|p| p + from)
}

fn line_of(input: &str, offset: usize) -> usize {
    input.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}
