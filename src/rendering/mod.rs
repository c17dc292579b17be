//! Raster helpers for captured slides

pub mod layout;
pub mod raster;

use crate::error::{Error, Result};
use image::{ImageFormat, RgbImage};
use sha2::{Digest, Sha256};

/// A captured slide: PNG bytes plus their pixel dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
}

impl Screenshot {
    /// Wrap PNG bytes after checking they decode
    pub fn from_png(png_data: Vec<u8>) -> Result<Self> {
        let decoded = image::load_from_memory_with_format(&png_data, ImageFormat::Png)
            .map_err(|e| Error::RenderError(format!("Snapshot is not a valid PNG: {}", e)))?;
        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(Error::RenderError("Snapshot is empty".into()));
        }
        Ok(Self { width, height, png_data })
    }

    /// Hex SHA-256 of the PNG bytes
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.png_data))
    }

    /// Decode and flatten onto `background`
    pub fn to_rgb(&self, background: [u8; 3]) -> Result<RgbImage> {
        let decoded = image::load_from_memory_with_format(&self.png_data, ImageFormat::Png)
            .map_err(|e| Error::RenderError(format!("Failed to decode snapshot: {}", e)))?;
        Ok(raster::flatten(&decoded.to_rgba8(), background))
    }
}

/// Encode an RGBA buffer as PNG. Used by tests and fake surfaces.
pub fn encode_png(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>> {
    let img = image::RgbaImage::from_raw(width, height, rgba.to_vec())
        .ok_or_else(|| Error::RenderError("RGBA buffer does not match dimensions".into()))?;
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::RenderError(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screenshot_reads_png_header() {
        let png = encode_png(4, 2, &[255u8; 4 * 2 * 4]).unwrap();
        let shot = Screenshot::from_png(png.clone()).unwrap();
        assert_eq!((shot.width, shot.height), (4, 2));
        assert_eq!(shot.digest(), Screenshot::from_png(png).unwrap().digest());
        assert_eq!(shot.digest().len(), 64);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Screenshot::from_png(b"not a png".to_vec()).is_err());
    }
}
