// Garment image preparation
// Normalizes uploads to RGBA PNG, strips the background and crops to the garment

use crate::core::config::PreprocessConfig;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Failed to decode garment image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode garment image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Background removal failed: {0}")]
    BackgroundRemoval(String),
}

pub type PreprocessResult<T> = Result<T, PreprocessError>;

/// An encoded garment image ready to become a texture
#[derive(Debug, Clone)]
pub struct PreparedGarment {
    pub bytes: Vec<u8>,
    /// True when preprocessing failed and `bytes` is the upload as received
    pub degraded: bool,
}

impl PreparedGarment {
    pub fn data_uri(&self) -> String {
        let mime = image::guess_format(&self.bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream");
        format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(&self.bytes))
    }
}

// ==============================================================================
// Background Removal
// ==============================================================================

pub trait BackgroundRemover: Send + Sync {
    fn remove(&self, image: RgbaImage) -> PreprocessResult<RgbaImage>;
}

/// Leaves the image as uploaded; for garments already shot on transparency
pub struct KeepBackground;

impl BackgroundRemover for KeepBackground {
    fn remove(&self, image: RgbaImage) -> PreprocessResult<RgbaImage> {
        Ok(image)
    }
}

/// Clears pixels close to the corner colour. Product shots on a plain backdrop
/// work; a busy background is reported as a failure.
pub struct ChromaKeyRemover {
    pub tolerance: u8,
}

impl Default for ChromaKeyRemover {
    fn default() -> Self {
        Self { tolerance: 24 }
    }
}

impl ChromaKeyRemover {
    fn close(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        a.0[..3]
            .iter()
            .zip(&b.0[..3])
            .all(|(x, y)| x.abs_diff(*y) <= self.tolerance)
    }
}

impl BackgroundRemover for ChromaKeyRemover {
    fn remove(&self, mut image: RgbaImage) -> PreprocessResult<RgbaImage> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(PreprocessError::BackgroundRemoval("empty image".to_string()));
        }

        let key = *image.get_pixel(0, 0);
        let corners = [(w - 1, 0), (0, h - 1), (w - 1, h - 1)];
        if corners
            .iter()
            .any(|&(x, y)| !self.close(image.get_pixel(x, y), &key))
        {
            return Err(PreprocessError::BackgroundRemoval(
                "background is not a uniform colour".to_string(),
            ));
        }

        let mut cleared = 0usize;
        for pixel in image.pixels_mut() {
            if self.close(pixel, &key) {
                pixel.0[3] = 0;
                cleared += 1;
            }
        }
        debug!("Chroma key cleared {} of {} pixels", cleared, w as usize * h as usize);
        Ok(image)
    }
}

// ==============================================================================
// Preprocessor
// ==============================================================================

pub trait ClothPreprocessor: Send + Sync {
    fn prepare(&self, raw: &[u8]) -> PreprocessResult<PreparedGarment>;
}

/// Decode, remove background, crop to content, encode PNG
pub struct SmartCropPreprocessor {
    remover: Box<dyn BackgroundRemover>,
    padding: u32,
    alpha_threshold: u8,
}

impl SmartCropPreprocessor {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            remover: Box::new(KeepBackground),
            padding: config.crop_padding,
            alpha_threshold: config.alpha_threshold,
        }
    }

    pub fn with_remover(mut self, remover: Box<dyn BackgroundRemover>) -> Self {
        self.remover = remover;
        self
    }
}

impl ClothPreprocessor for SmartCropPreprocessor {
    fn prepare(&self, raw: &[u8]) -> PreprocessResult<PreparedGarment> {
        let decoded = image::load_from_memory(raw).map_err(PreprocessError::Decode)?;
        let rgba = self.remover.remove(decoded.to_rgba8())?;

        let (w, h) = rgba.dimensions();
        let image = match crop_to_content(&rgba, self.padding, self.alpha_threshold) {
            Some(cropped) => {
                debug!("Cropped garment {}x{} -> {}x{}", w, h, cropped.width(), cropped.height());
                cropped
            }
            None => {
                debug!("Garment image is fully transparent, keeping it uncropped");
                rgba
            }
        };

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(PreprocessError::Encode)?;

        Ok(PreparedGarment {
            bytes,
            degraded: false,
        })
    }
}

/// Tight crop around pixels whose alpha exceeds `alpha_threshold`, grown by
/// `padding` on every side and clamped to the image. `None` when no pixel
/// qualifies.
pub fn crop_to_content(image: &RgbaImage, padding: u32, alpha_threshold: u8) -> Option<RgbaImage> {
    let (w, h) = image.dimensions();
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] > alpha_threshold {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((min_x, min_y, max_x, max_y)) => {
                    (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                }
            });
        }
    }

    let (min_x, min_y, max_x, max_y) = bounds?;
    let x0 = min_x.saturating_sub(padding);
    let y0 = min_y.saturating_sub(padding);
    let x1 = max_x.saturating_add(1).saturating_add(padding).min(w);
    let y1 = max_y.saturating_add(1).saturating_add(padding).min(h);

    Some(image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Run the preprocessor, falling back to the upload as received on any failure
pub fn prepare_or_original(preprocessor: &dyn ClothPreprocessor, raw: &[u8]) -> PreparedGarment {
    match preprocessor.prepare(raw) {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!("Garment preprocessing failed, using original image: {}", e);
            PreparedGarment {
                bytes: raw.to_vec(),
                degraded: true,
            }
        }
    }
}
