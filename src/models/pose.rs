// Data models for body pose landmarks that drive the garment drape

use serde::{Deserialize, Serialize};

/// Number of landmarks in a MediaPipe body pose
pub const BODY_LANDMARK_COUNT: usize = 33;

// ==============================================================================
// Landmark
// ==============================================================================

/// A single tracked anatomical point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32, // Normalized [0, 1] image space
    pub y: f32, // Normalized [0, 1] image space
    #[serde(default)]
    pub z: f32, // Depth relative to the hip midpoint
    #[serde(default)]
    pub visibility: f32, // Confidence [0, 1]
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }

    /// Image-space position is a real number; depth is not used for placement
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// MediaPipe Pose Landmark indices (33 total)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    /// The four points the drape is anchored to
    pub const ANCHORS: [BodyLandmark; 4] = [
        BodyLandmark::LeftShoulder,
        BodyLandmark::RightShoulder,
        BodyLandmark::LeftHip,
        BodyLandmark::RightHip,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Skeleton edges drawn by the debug overlay
pub const POSE_CONNECTIONS: &[(BodyLandmark, BodyLandmark)] = &[
    (BodyLandmark::LeftShoulder, BodyLandmark::RightShoulder),
    (BodyLandmark::LeftShoulder, BodyLandmark::LeftElbow),
    (BodyLandmark::LeftElbow, BodyLandmark::LeftWrist),
    (BodyLandmark::RightShoulder, BodyLandmark::RightElbow),
    (BodyLandmark::RightElbow, BodyLandmark::RightWrist),
    (BodyLandmark::LeftShoulder, BodyLandmark::LeftHip),
    (BodyLandmark::RightShoulder, BodyLandmark::RightHip),
    (BodyLandmark::LeftHip, BodyLandmark::RightHip),
    (BodyLandmark::LeftHip, BodyLandmark::LeftKnee),
    (BodyLandmark::LeftKnee, BodyLandmark::LeftAnkle),
    (BodyLandmark::RightHip, BodyLandmark::RightKnee),
    (BodyLandmark::RightKnee, BodyLandmark::RightAnkle),
    (BodyLandmark::Nose, BodyLandmark::LeftEye),
    (BodyLandmark::Nose, BodyLandmark::RightEye),
    (BodyLandmark::LeftEye, BodyLandmark::LeftEar),
    (BodyLandmark::RightEye, BodyLandmark::RightEar),
];

// ==============================================================================
// Pose Frame
// ==============================================================================

/// One tracked person for one video frame. Index identity matters, so the
/// landmarks live in a fixed-size array where a missing point is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseFrame {
    pub timestamp_ms: i64,
    landmarks: [Option<Landmark>; BODY_LANDMARK_COUNT],
}

/// The four landmarks the drape is built from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoAnchors {
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub left_hip: Landmark,
    pub right_hip: Landmark,
}

impl PoseFrame {
    /// Build a frame from a landmarker's ordered output. A short list leaves the
    /// trailing indices absent; extra entries are ignored. A landmark with a
    /// non-finite position is treated as absent.
    pub fn from_landmarks(landmarks: Vec<Landmark>, timestamp_ms: i64) -> Self {
        let mut slots = [None; BODY_LANDMARK_COUNT];
        for (slot, landmark) in slots.iter_mut().zip(landmarks) {
            *slot = Some(landmark).filter(Landmark::is_finite);
        }
        Self {
            timestamp_ms,
            landmarks: slots,
        }
    }

    pub fn get(&self, landmark: BodyLandmark) -> Option<&Landmark> {
        self.landmarks[landmark.index()].as_ref()
    }

    /// Drop a landmark, as a model does when a point leaves the frame
    pub fn without(mut self, landmark: BodyLandmark) -> Self {
        self.landmarks[landmark.index()] = None;
        self
    }

    /// All four anchors, or `None` if any of them is absent
    pub fn anchors(&self) -> Option<TorsoAnchors> {
        Some(TorsoAnchors {
            left_shoulder: *self.get(BodyLandmark::LeftShoulder)?,
            right_shoulder: *self.get(BodyLandmark::RightShoulder)?,
            left_hip: *self.get(BodyLandmark::LeftHip)?,
            right_hip: *self.get(BodyLandmark::RightHip)?,
        })
    }

    /// Present landmarks with their index
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Landmark)> {
        self.landmarks
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.as_ref().map(|l| (i, l)))
    }
}

/// One person proposed by the pose model, before confidence gating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseCandidate {
    pub landmarks: Vec<Landmark>,
    pub score: f32,    // Detection / tracking confidence
    pub presence: f32, // Pose presence confidence
}

impl PoseCandidate {
    /// Candidate whose scores are the mean landmark visibility
    pub fn from_landmarks(landmarks: Vec<Landmark>) -> Self {
        let score = if landmarks.is_empty() {
            0.0
        } else {
            landmarks.iter().map(|l| l.visibility).sum::<f32>() / landmarks.len() as f32
        };
        Self {
            landmarks,
            score,
            presence: score,
        }
    }
}

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    pub min_detection_confidence: f32, // Default: 0.6
    pub min_presence_confidence: f32,  // Default: 0.6
    pub min_tracking_confidence: f32,  // Default: 0.6
    pub num_poses: u32,                // Single-person tracking
    pub target_fps: u32,               // Render/detection cadence (default: 30)
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.6,
            min_presence_confidence: 0.6,
            min_tracking_confidence: 0.6,
            num_poses: 1,
            target_fps: 30,
        }
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Pose provider not initialized")]
    NotInitialized,

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Malformed landmark payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Timestamp {got} is not after {last}")]
    NonMonotonicTimestamp { last: i64, got: i64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PoseResult<T> = Result<T, PoseError>;
