// Still-image compositing for capture
// Merges the mirrored camera frame with the renderer's garment layer

use crate::models::capture::{CaptureResult, RawFrame, Snapshot};
use chrono::Utc;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::{debug, warn};

pub struct Compositor {
    width: u32,
    height: u32,
}

impl Compositor {
    /// Snapshots are produced at `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Camera frame as the user sees it: flipped horizontally, at output size
    pub fn mirror(&self, frame: &RawFrame) -> CaptureResult<RgbaImage> {
        let video = imageops::flip_horizontal(&frame.to_rgba_image()?);
        Ok(self.fit(video))
    }

    /// Build the still handed to fit analysis. A missing renderer surface is
    /// not an error: the snapshot then holds the video alone.
    pub fn compose(&self, frame: &RawFrame, surface: Option<&RgbaImage>) -> CaptureResult<Snapshot> {
        let mut image = self.mirror(frame)?;

        let includes_garment = match surface {
            Some(layer) => {
                if layer.dimensions() == image.dimensions() {
                    imageops::overlay(&mut image, layer, 0, 0);
                } else {
                    let scaled = imageops::resize(layer, self.width, self.height, FilterType::Triangle);
                    imageops::overlay(&mut image, &scaled, 0, 0);
                }
                true
            }
            None => {
                warn!("Renderer surface unavailable, capturing video only");
                false
            }
        };

        let png = encode_png(&image)?;
        debug!(
            "Composited {}x{} snapshot ({} bytes)",
            image.width(),
            image.height(),
            png.len()
        );

        Ok(Snapshot {
            image,
            png,
            includes_garment,
            captured_at: Utc::now(),
        })
    }

    fn fit(&self, image: RgbaImage) -> RgbaImage {
        if image.dimensions() == (self.width, self.height) {
            image
        } else {
            imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        }
    }
}

pub fn encode_png(image: &RgbaImage) -> CaptureResult<Vec<u8>> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
