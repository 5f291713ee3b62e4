// MediaPipe pose landmarker bridge
// Wraps an external landmarker behind a provider trait and applies the
// single-person confidence gating the drape relies on

use crate::models::capture::RawFrame;
use crate::models::pose::{
    Landmark, PoseCandidate, PoseConfig, PoseError, PoseFrame, PoseResult,
};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};

/// Pose provider trait
/// Implement this for any landmarker backend (in-process model, sidecar process, replay)
pub trait PoseProvider: Send {
    /// Run detection for one frame. Timestamps must strictly increase.
    /// Returns `Ok(None)` when no person passes the confidence thresholds.
    fn detect(&mut self, frame: &RawFrame, timestamp_ms: i64) -> PoseResult<Option<PoseFrame>>;

    /// Check if the backend is ready to produce poses
    fn is_initialized(&self) -> bool;

    /// Get model info
    fn get_model_info(&self) -> String;
}

// ==============================================================================
// Confidence Gating
// ==============================================================================

/// Pick the single person the mirror follows. Candidates below the score or
/// presence thresholds are discarded; of the rest, the highest score wins.
/// While a person is already tracked the tracking threshold applies instead of
/// the detection threshold.
pub fn select_primary_pose(
    candidates: Vec<PoseCandidate>,
    config: &PoseConfig,
    tracking: bool,
) -> Option<PoseCandidate> {
    let min_score = if tracking {
        config.min_tracking_confidence
    } else {
        config.min_detection_confidence
    };

    candidates
        .into_iter()
        .filter(|c| c.score >= min_score && c.presence >= config.min_presence_confidence)
        .filter(|c| !c.landmarks.is_empty())
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Stateful gate: remembers whether the previous frame had a person so the
/// right threshold is applied
#[derive(Debug, Clone)]
pub struct PoseGate {
    config: PoseConfig,
    tracking: bool,
}

impl PoseGate {
    pub fn new(config: PoseConfig) -> PoseResult<Self> {
        for (name, value) in [
            ("min_detection_confidence", config.min_detection_confidence),
            ("min_presence_confidence", config.min_presence_confidence),
            ("min_tracking_confidence", config.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoseError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if config.num_poses == 0 {
            return Err(PoseError::InvalidConfig("num_poses must be at least 1".to_string()));
        }

        Ok(Self {
            config,
            tracking: false,
        })
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn admit(&mut self, candidates: Vec<PoseCandidate>, timestamp_ms: i64) -> Option<PoseFrame> {
        let proposed = candidates.len();
        let selected = select_primary_pose(candidates, &self.config, self.tracking);
        if proposed > 1 {
            debug!("Landmarker proposed {} people, keeping one", proposed);
        }
        self.tracking = selected.is_some();
        selected.map(|c| PoseFrame::from_landmarks(c.landmarks, timestamp_ms))
    }
}

// ==============================================================================
// Landmarker Payload
// ==============================================================================

/// JSON produced by a MediaPipe pose landmarker: one landmark list per person,
/// with optional per-person scores
#[derive(Debug, Deserialize)]
struct LandmarkerPayload {
    #[serde(default)]
    landmarks: Vec<Vec<Landmark>>,
    #[serde(default)]
    scores: Vec<f32>,
    #[serde(default)]
    presence: Vec<f32>,
}

/// Parse a landmarker result. People without an explicit score are scored by
/// mean landmark visibility.
pub fn parse_landmarker_payload(json: &str) -> PoseResult<Vec<PoseCandidate>> {
    let payload: LandmarkerPayload = serde_json::from_str(json)?;

    let candidates = payload
        .landmarks
        .into_iter()
        .enumerate()
        .map(|(i, landmarks)| {
            let mut candidate = PoseCandidate::from_landmarks(landmarks);
            if let Some(score) = payload.scores.get(i) {
                candidate.score = *score;
                candidate.presence = *score;
            }
            if let Some(presence) = payload.presence.get(i) {
                candidate.presence = *presence;
            }
            candidate
        })
        .collect();

    Ok(candidates)
}

// ==============================================================================
// Feed Provider (external landmarker process)
// ==============================================================================

/// Sending half of a pose feed. Only the latest result is kept; a slow consumer
/// skips stale results rather than queueing them.
#[derive(Debug, Clone)]
pub struct PoseFeed {
    tx: watch::Sender<Vec<PoseCandidate>>,
}

impl PoseFeed {
    pub fn publish(&self, candidates: Vec<PoseCandidate>) {
        self.tx.send_replace(candidates);
    }

    pub fn publish_json(&self, json: &str) -> PoseResult<()> {
        let candidates = parse_landmarker_payload(json)?;
        self.publish(candidates);
        Ok(())
    }

    /// Publish "nobody in view"
    pub fn clear(&self) {
        self.publish(Vec::new());
    }
}

/// Provider that reads whatever the external landmarker published last
pub struct FeedPoseProvider {
    rx: watch::Receiver<Vec<PoseCandidate>>,
    gate: PoseGate,
    last_timestamp_ms: Option<i64>,
}

impl FeedPoseProvider {
    pub fn channel(config: PoseConfig) -> PoseResult<(PoseFeed, Self)> {
        let gate = PoseGate::new(config)?;
        let (tx, rx) = watch::channel(Vec::new());
        info!("Pose feed provider ready");
        Ok((
            PoseFeed { tx },
            Self {
                rx,
                gate,
                last_timestamp_ms: None,
            },
        ))
    }
}

impl PoseProvider for FeedPoseProvider {
    fn detect(&mut self, _frame: &RawFrame, timestamp_ms: i64) -> PoseResult<Option<PoseFrame>> {
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms <= last {
                return Err(PoseError::NonMonotonicTimestamp {
                    last,
                    got: timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        let candidates = self.rx.borrow_and_update().clone();
        Ok(self.gate.admit(candidates, timestamp_ms))
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn get_model_info(&self) -> String {
        "MediaPipe pose landmarker (external feed)".to_string()
    }
}

// ==============================================================================
// Dummy Implementation (no model available)
// ==============================================================================

pub struct DummyPoseProvider {
    config: PoseConfig,
}

impl DummyPoseProvider {
    pub fn new(config: &PoseConfig) -> Self {
        info!("Using dummy pose provider (no inference)");
        Self {
            config: config.clone(),
        }
    }
}

impl PoseProvider for DummyPoseProvider {
    fn detect(&mut self, _frame: &RawFrame, _timestamp_ms: i64) -> PoseResult<Option<PoseFrame>> {
        Ok(None)
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn get_model_info(&self) -> String {
        format!(
            "Dummy pose provider (no inference, {} pose max)",
            self.config.num_poses
        )
    }
}
