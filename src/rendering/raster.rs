/// Alpha flattening and color parsing

use image::{RgbImage, RgbaImage};

/// Composite `rgba` over an opaque `background`
pub fn flatten(rgba: &RgbaImage, background: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |fg: u8, bg: u8| -> u8 {
            let a = a as u32;
            ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([blend(r, background[0]), blend(g, background[1]), blend(b, background[2])])
    })
}

/// Parse `#rgb` / `#rrggbb`. Anything else (named colors, gradients) is `None`.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.trim().strip_prefix('#')?;
    let channel = |i: usize, len: usize| -> Option<u8> {
        let part = hex.get(i * len..(i + 1) * len)?;
        let v = u8::from_str_radix(part, 16).ok()?;
        Some(if len == 1 { v * 17 } else { v })
    };
    match hex.len() {
        3 => Some([channel(0, 1)?, channel(1, 1)?, channel(2, 1)?]),
        6 => Some([channel(0, 2)?, channel(1, 2)?, channel(2, 2)?]),
        _ => None,
    }
}
