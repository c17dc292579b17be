/// Placement geometry for page assembly

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Largest rect with the aspect ratio of `content` that fits into
/// `page`, centered on both axes.
pub fn fit_centered(content: (u32, u32), page: (f64, f64)) -> Rect {
    let (cw, ch) = (content.0.max(1) as f64, content.1.max(1) as f64);
    let (pw, ph) = page;
    let scale = (pw / cw).min(ph / ch);
    let (width, height) = (cw * scale, ch * scale);
    Rect {
        x: (pw - width) / 2.0,
        y: (ph - height) / 2.0,
        width,
        height,
    }
}
