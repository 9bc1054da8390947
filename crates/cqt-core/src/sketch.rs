//! Freehand sketch attachments
//!
//! The viewer saves its drawing canvas as a PNG even when nothing was
//! drawn. A sketch that renders identical to an empty canvas is stored as
//! "no sketch", otherwise every save would grow the payload by another
//! blank PNG.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SketchError {
    #[error("sketch is not valid base64")]
    Base64,

    #[error("sketch is not a readable PNG: {0}")]
    Decode(String),
}

/// The blank canvas sketches are compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SketchCanvas {
    /// RGBA fill of an untouched canvas
    pub background: [u8; 4],
}

impl Default for SketchCanvas {
    fn default() -> Self {
        Self {
            background: [255, 255, 255, 255],
        }
    }
}

impl SketchCanvas {
    pub fn new(background: [u8; 4]) -> Self {
        Self { background }
    }

    /// Whether a base64 PNG is visually empty
    ///
    /// Renders the image and compares it pixel by pixel with a blank
    /// canvas of the same size. Fully transparent pixels count as blank.
    pub fn is_blank(&self, png_b64: &str) -> Result<bool, SketchError> {
        let bytes = STANDARD
            .decode(png_b64.trim())
            .map_err(|_| SketchError::Base64)?;
        let drawn = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| SketchError::Decode(e.to_string()))?
            .to_rgba8();

        let blank = RgbaImage::from_pixel(drawn.width(), drawn.height(), Rgba(self.background));
        Ok(drawn
            .pixels()
            .zip(blank.pixels())
            .all(|(px, bg)| px == bg || px.0[3] == 0))
    }

    /// Map empty or blank sketches to `None`
    pub fn normalize(&self, sketch_png: Option<String>) -> Result<Option<String>, SketchError> {
        match sketch_png {
            None => Ok(None),
            Some(png) if png.trim().is_empty() => Ok(None),
            Some(png) => {
                if self.is_blank(&png)? {
                    tracing::debug!("dropping blank sketch");
                    Ok(None)
                } else {
                    Ok(Some(png))
                }
            }
        }
    }
}
