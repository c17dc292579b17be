//! Slide extraction.
//!
//! Turns a sanitized [`Document`] into an ordered, non-empty list of
//! [`Slide`]s. Every slide owns a deep copy of its markup with executable
//! scripts partitioned out, so later stages can mutate it freely.

use crate::document::{Document, Element, Node};
use crate::error::{Error, Result};
use crate::script::{head_externals, partition, ScriptRef, ScriptScope};

/// One capturable unit of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slide {
    /// 1-based position in document order
    pub index: usize,
    /// The slide element with its executable scripts removed
    pub content: Element,
    /// Scripts found inside the slide, in document order
    pub scripts: Vec<ScriptRef>,
}

/// Document-level context shared by every slide
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadContext {
    pub scripts: Vec<ScriptRef>,
    /// `<style>` and `<link rel="stylesheet">` elements in document order:
    /// the head's, then any left in the body outside every slide
    pub styles: Vec<Element>,
}

impl HeadContext {
    pub fn from_document(doc: &Document) -> Self {
        let Some(head) = doc.head() else {
            return Self::default();
        };
        let styles = head
            .child_elements()
            .filter(|e| is_stylesheet(e))
            .cloned()
            .collect();
        Self {
            scripts: head_externals(head),
            styles,
        }
    }

    /// Serialized stylesheet markup for the surface document head
    pub fn styles_html(&self) -> String {
        self.styles.iter().map(Element::to_html).collect()
    }
}

fn is_stylesheet(el: &Element) -> bool {
    match el.name.as_str() {
        "style" => true,
        "link" => el
            .attr("rel")
            .map(|rel| rel.split_ascii_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
            .unwrap_or(false),
        _ => false,
    }
}

/// Extract slides marked with `slide_class` from `doc`.
///
/// `input` is the original markup; it travels with structural errors so the
/// caller can request a corrected version.
pub fn extract_slides(doc: &Document, input: &str, slide_class: &str) -> Result<(Vec<Slide>, HeadContext)> {
    if let Some(message) = doc.parse_error() {
        return Err(Error::Parse {
            message: message.to_string(),
            input: input.to_string(),
        });
    }

    let mut marked = Vec::new();
    doc.root().select_class(slide_class, &mut marked);

    let mut loose_styles = Vec::new();
    if !marked.is_empty() {
        if let Some(body) = doc.body() {
            collect_loose_styles(body, slide_class, &mut loose_styles);
        }
    }

    let elements: Vec<Element> = if marked.is_empty() {
        let body = match doc.body() {
            Some(body) if !body.is_blank() => body,
            _ => return Err(Error::NoSlides { input: input.to_string() }),
        };
        log::debug!("no .{} elements, using the body as a single slide", slide_class);
        let mut wrapper = Element::new("div");
        wrapper.children = body.children.iter().filter(|n| !is_stray_text(n)).cloned().collect();
        vec![wrapper]
    } else {
        marked.into_iter().cloned().collect()
    };

    let slides = elements
        .into_iter()
        .enumerate()
        .map(|(i, mut content)| {
            let index = i + 1;
            let scripts = partition(&mut content, ScriptScope::Slide, Some(index));
            Slide { index, content, scripts }
        })
        .collect::<Vec<_>>();

    log::debug!("extracted {} slide(s)", slides.len());
    let mut head = HeadContext::from_document(doc);
    head.styles.extend(loose_styles);
    Ok((slides, head))
}

// Stylesheets outside any slide apply to every slide
fn collect_loose_styles(el: &Element, slide_class: &str, out: &mut Vec<Element>) {
    for child in el.child_elements() {
        if child.has_class(slide_class) {
            continue;
        }
        if is_stylesheet(child) {
            out.push(child.clone());
        } else {
            collect_loose_styles(child, slide_class, out);
        }
    }
}

// Whitespace between top-level body nodes carries no content
fn is_stray_text(node: &Node) -> bool {
    matches!(node, Node::Text(t) if t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Result<(Vec<Slide>, HeadContext)> {
        extract_slides(&Document::parse(html), html, "slide")
    }

    #[test]
    fn marked_slides_in_document_order() {
        let (slides, _) = extract(
            r#"<body><div class="slide">A</div><section><div class="slide wide">B</div></section><div class="slide">C</div></body>"#,
        )
        .unwrap();
        let texts: Vec<String> = slides.iter().map(|s| s.content.text()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
        assert_eq!(slides.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn unmarked_body_becomes_one_slide() {
        let (slides, _) = extract("<body><h1>Title</h1>\n<p>text</p></body>").unwrap();
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].content.name, "div");
        assert_eq!(slides[0].content.inner_html(), "<h1>Title</h1><p>text</p>");
    }

    #[test]
    fn blank_body_is_no_slides() {
        let err = extract("<html><body>  \n </body></html>").unwrap_err();
        assert!(matches!(err, Error::NoSlides { .. }));
        assert!(err.diagnostic().is_some());
    }

    #[test]
    fn parse_error_carries_input() {
        let input = "<div class=\"slide\"><p>ok</p></div>\n<div class=\"slide\"";
        match extract(input).unwrap_err() {
            Error::Parse { message, input: carried } => {
                assert!(message.contains("line 2"), "{}", message);
                assert_eq!(carried, input);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn scripts_are_partitioned_per_slide() {
        let (slides, head) = extract(
            r#"<html><head><link rel="stylesheet" href="https://cdn.jsdelivr.net/x.css">
            <style>.slide{color:red}</style><meta charset="utf-8">
            <script src="https://cdn.tailwindcss.com"></script></head>
            <body><div class="slide"><script>one()</script></div><div class="slide"><p>two</p></div></body></html>"#,
        )
        .unwrap();
        assert_eq!(slides[0].scripts.len(), 1);
        assert!(slides[1].scripts.is_empty());
        assert!(!slides[0].content.to_html().contains("<script"));
        assert_eq!(head.scripts.len(), 1);
        assert_eq!(head.styles.len(), 2);
        assert!(head.styles_html().contains("color:red"));
    }

    #[test]
    fn slide_copies_are_independent() {
        let doc = Document::parse(r#"<body><div class="slide">A</div></body>"#);
        let (mut slides, _) = extract_slides(&doc, "", "slide").unwrap();
        slides[0].content.push_style("width:1280px");
        let mut again = Vec::new();
        doc.root().select_class("slide", &mut again);
        assert_eq!(again[0].attr("style"), None);
    }

    #[test]
    fn body_stylesheets_outside_slides_are_shared() {
        let (slides, head) = extract(
            r#"<html><head><style>h1{color:red}</style></head><body>
            <style>.slide{background:#eee}</style>
            <section><link rel="stylesheet" href="https://cdn.jsdelivr.net/theme.css"></section>
            <div class="slide"><style>.inner{color:blue}</style>A</div>
            </body></html>"#,
        )
        .unwrap();
        assert_eq!(slides.len(), 1);
        assert_eq!(head.styles.len(), 3);
        let html = head.styles_html();
        assert!(html.find("color:red").unwrap() < html.find("background:#eee").unwrap());
        assert!(html.contains("theme.css"));
        // styles inside a slide travel with the slide
        assert!(!html.contains(".inner"));
        assert!(slides[0].content.to_html().contains(".inner"));
    }
}
