// Data structures for camera frames, still captures and capture sessions

use super::garment::GarmentTexture;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shown while an analysis request is in flight
pub const PENDING_MESSAGE: &str = "Analyzing your fit...";
/// Prefix marking an error payload returned by the analysis backend
pub const WARNING_PREFIX: &str = "⚠️ ";
/// Shown when the analysis backend could not be reached at all
pub const FALLBACK_MESSAGE: &str = "Oops! My vision is blurry. Try again?";

// ==============================================================================
// Camera Frames
// ==============================================================================

/// A frame from the camera, unmirrored
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

/// Pixel format of captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    RGBA8,
    BGRA8,
}

impl RawFrame {
    /// Convert to an RGBA image, swapping channels for BGRA sources
    pub fn to_rgba_image(&self) -> CaptureResult<RgbaImage> {
        let expected = self.width as usize * self.height as usize * 4;
        if self.data.len() != expected {
            return Err(CaptureError::InvalidFrame {
                expected,
                actual: self.data.len(),
            });
        }

        let mut data = self.data.clone();
        if self.format == PixelFormat::BGRA8 {
            for px in data.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }

        RgbaImage::from_raw(self.width, self.height, data).ok_or(CaptureError::InvalidFrame {
            expected,
            actual: self.data.len(),
        })
    }
}

// ==============================================================================
// Snapshot
// ==============================================================================

/// The composite still handed to fit analysis
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub image: RgbaImage,
    pub png: Vec<u8>,
    pub includes_garment: bool, // False when the renderer surface was unavailable
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn data_uri(&self) -> String {
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&self.png))
    }
}

// ==============================================================================
// Capture State Machine
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    CountdownActive(u8),
    Capturing,
    ShowingResult,
    Retrying,
}

impl CaptureState {
    pub fn to_string(&self) -> String {
        match self {
            CaptureState::Idle => "idle".to_string(),
            CaptureState::CountdownActive(n) => format!("countdown({})", n),
            CaptureState::Capturing => "capturing".to_string(),
            CaptureState::ShowingResult => "showing_result".to_string(),
            CaptureState::Retrying => "retrying".to_string(),
        }
    }

    /// States in which the countdown guard may fire
    pub fn is_waiting(&self) -> bool {
        matches!(self, CaptureState::Idle | CaptureState::Retrying)
    }
}

/// What the result panel shows for the current capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    Pending,
    Reply(String),
    Warning(String), // Error payload from the backend, shown verbatim
    Unreachable,
}

impl AnalysisStatus {
    pub fn display_text(&self) -> String {
        match self {
            AnalysisStatus::Pending => PENDING_MESSAGE.to_string(),
            AnalysisStatus::Reply(text) => text.clone(),
            AnalysisStatus::Warning(error) => format!("{}{}", WARNING_PREFIX, error),
            AnalysisStatus::Unreachable => FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// Everything tied to one garment upload
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    pub cloth_texture: Option<GarmentTexture>,
    pub processing_garment: bool,
    pub countdown_remaining: Option<u8>,
    pub has_captured: bool,
    pub snapshot: Option<Arc<Snapshot>>,
    pub analysis: Option<AnalysisStatus>,
}

impl CaptureSession {
    /// Forget the capture but keep the garment
    pub fn discard_capture(&mut self) {
        self.countdown_remaining = None;
        self.has_captured = false;
        self.snapshot = None;
        self.analysis = None;
    }

    pub fn message(&self) -> Option<String> {
        self.analysis.as_ref().map(|a| a.display_text())
    }
}

/// Error types for capture operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No video frame available")]
    NoFrame,

    #[error("Invalid frame buffer: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },

    #[error("Image encoding failed: {0}")]
    Encoding(#[from] image::ImageError),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
