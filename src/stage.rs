//! Surface documents and layering fixups.
//!
//! Every slide is rendered alone in a fresh document: the head stylesheets,
//! a reset style, and a `#capture-root` container of exactly the logical
//! slide size holding the slide element.

use crate::extract::{HeadContext, Slide};
use crate::Viewport;
use serde::{Deserialize, Serialize};

/// Id of the container every slide is mounted into
pub const CAPTURE_ROOT: &str = "capture-root";

/// Marker attribute on the mounted slide element
pub const SLIDE_ROOT_ATTR: &str = "data-slide-root";

/// Which layering corrections run before the snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LayeringStrategy {
    /// Direct children of the slide: absolute ones to the back, the rest in front
    Structural,
    /// Tailwind `z-*` classes become explicit z-indexes
    UtilityClasses,
    /// Both of the above plus icon and column-flex alignment
    #[default]
    Combined,
    None,
}

impl LayeringStrategy {
    fn structural(self) -> bool {
        matches!(self, Self::Structural | Self::Combined)
    }

    fn utility_classes(self) -> bool {
        matches!(self, Self::UtilityClasses | Self::Combined)
    }

    fn alignment(self) -> bool {
        matches!(self, Self::Combined)
    }
}

const STRUCTURAL_FIXUP: &str = r#"
    Array.from(slide.children).forEach(function(child){
        if (getComputedStyle(child).position === 'absolute') {
            child.style.zIndex = '0';
        } else {
            child.style.position = 'relative';
            child.style.zIndex = '10';
        }
        fixed++;
    });"#;

const UTILITY_CLASS_FIXUP: &str = r#"
    ['z-0','z-10','z-20','z-30','z-40','z-50'].forEach(function(cls){
        slide.querySelectorAll('.' + cls).forEach(function(el){
            if (getComputedStyle(el).position === 'static') el.style.position = 'relative';
            el.style.zIndex = cls.split('-')[1];
            fixed++;
        });
    });"#;

const ALIGNMENT_FIXUP: &str = r#"
    slide.querySelectorAll('.fa, .fas, .far, .fab, .fa-solid, .fa-regular, .fa-brands').forEach(function(el){
        el.style.lineHeight = '1';
        el.style.display = 'inline-block';
        el.style.verticalAlign = 'middle';
        fixed++;
    });
    var cs = getComputedStyle(slide);
    if (cs.display === 'flex' && cs.flexDirection === 'column') {
        var inFlow = Array.from(slide.children).filter(function(c){
            var p = getComputedStyle(c).position;
            return p !== 'absolute' && p !== 'fixed';
        });
        var before = inFlow.map(function(c){ return c.getBoundingClientRect().top; });
        slide.style.justifyContent = 'flex-start';
        slide.style.alignItems = 'stretch';
        inFlow.forEach(function(c, i){
            var delta = before[i] - c.getBoundingClientRect().top;
            if (Math.abs(delta) > 0.5) {
                c.style.position = 'relative';
                c.style.top = delta + 'px';
            }
        });
        fixed += inFlow.length;
    }"#;

/// Builds surface documents for one run
#[derive(Debug, Clone)]
pub struct Stage {
    pub viewport: Viewport,
    pub background: String,
    pub freeze_animations: bool,
}

impl Stage {
    pub fn new(viewport: Viewport, background: impl Into<String>, freeze_animations: bool) -> Self {
        Self {
            viewport,
            background: background.into(),
            freeze_animations,
        }
    }

    fn reset_css(&self) -> String {
        let Viewport { width, height } = self.viewport;
        let mut css = format!(
            "html,body{{margin:0;padding:0;width:{w}px;height:{h}px;background:{bg};overflow:hidden;}}\
             #{root}{{position:relative;width:{w}px;height:{h}px;overflow:hidden;margin:0;padding:0;background:{bg};}}",
            w = width,
            h = height,
            bg = self.background,
            root = CAPTURE_ROOT,
        );
        if self.freeze_animations {
            css.push_str("*,*::before,*::after{animation:none !important;transition:none !important;caret-color:transparent !important;}");
        }
        css
    }

    /// Complete surface document for `slide`
    pub fn document(&self, head: &HeadContext, slide: &Slide) -> String {
        let Viewport { width, height } = self.viewport;
        let mut content = slide.content.clone();
        content.set_attr(SLIDE_ROOT_ATTR, slide.index.to_string());
        content.push_style(&format!(
            "width:{}px;height:{}px;margin:0;transform:none;position:relative",
            width, height
        ));

        format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">{styles}<style>{reset}</style></head>\
             <body><div id=\"{root}\">{slide}</div></body></html>",
            styles = head.styles_html(),
            reset = self.reset_css(),
            root = CAPTURE_ROOT,
            slide = content.to_html(),
        )
    }

    /// Script applying `strategy` to the mounted slide. Evaluates to the
    /// number of elements touched; `None` when the strategy does nothing.
    pub fn fixup_script(&self, strategy: LayeringStrategy) -> Option<String> {
        if strategy == LayeringStrategy::None {
            return None;
        }
        let mut body = String::new();
        if strategy.structural() {
            body.push_str(STRUCTURAL_FIXUP);
        }
        if strategy.utility_classes() {
            body.push_str(UTILITY_CLASS_FIXUP);
        }
        if strategy.alignment() {
            body.push_str(ALIGNMENT_FIXUP);
        }

        let template = r#"(function(){
    var slide = document.querySelector('#{{ROOT}} > [{{ATTR}}]');
    if (!slide) return 0;
    var fixed = 0;
    {{BODY}}
    return fixed;
})()"#;
        Some(
            template
                .replace("{{ROOT}}", CAPTURE_ROOT)
                .replace("{{ATTR}}", SLIDE_ROOT_ATTR)
                .replace("{{BODY}}", &body),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::extract::extract_slides;

    fn first_slide(html: &str) -> (Slide, HeadContext) {
        let (mut slides, head) = extract_slides(&Document::parse(html), html, "slide").unwrap();
        (slides.remove(0), head)
    }

    #[test]
    fn document_sizes_container_and_slide() {
        let (slide, head) = first_slide(
            r#"<html><head><style>.slide{display:flex}</style></head>
            <body><div class="slide" style="transform:scale(0.5)">Hi</div></body></html>"#,
        );
        let stage = Stage::new(Viewport { width: 1280, height: 720 }, "#ffffff", true);
        let doc = stage.document(&head, &slide);

        assert!(doc.contains(".slide{display:flex}"));
        assert!(doc.contains("#capture-root{position:relative;width:1280px;height:720px"));
        assert!(doc.contains("animation:none !important"));
        assert!(doc.contains(r#"data-slide-root="1""#));
        assert!(doc.contains("transform:scale(0.5);width:1280px;height:720px;margin:0;transform:none;position:relative"));
    }

    #[test]
    fn animations_run_unless_frozen() {
        let (slide, head) = first_slide(r#"<body><div class="slide">Hi</div></body>"#);
        let stage = Stage::new(Viewport::default(), "#000", false);
        assert!(!stage.document(&head, &slide).contains("animation:none"));
    }

    #[test]
    fn fixup_script_follows_strategy() {
        let stage = Stage::new(Viewport::default(), "#fff", false);
        assert!(stage.fixup_script(LayeringStrategy::None).is_none());

        let structural = stage.fixup_script(LayeringStrategy::Structural).unwrap();
        assert!(structural.contains("child.style.zIndex = '10'"));
        assert!(!structural.contains("z-50"));

        let combined = stage.fixup_script(LayeringStrategy::Combined).unwrap();
        assert!(combined.contains("z-50"));
        assert!(combined.contains("fa-brands"));
        assert!(combined.contains("#capture-root > [data-slide-root]"));
        assert!(!combined.contains("{{"));
    }
}
