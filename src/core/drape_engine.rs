// Drape engine - warps the garment grid over the tracked torso every frame

use crate::core::config::DrapeConfig;
use crate::models::garment::{
    logical_to_geometry_index, GridPoint, GridVector, GRID_COLUMNS, GRID_POINTS, GRID_ROWS,
};
use crate::models::pose::{Landmark, PoseFrame, TorsoAnchors};
use tracing::debug;

pub const DEFAULT_VISIBLE_HEIGHT: f32 = 4.6;
pub const DEFAULT_NECK_EXTENSION: f32 = 0.25;
pub const DEFAULT_HEM_EXTENSION: f32 = 0.25;
pub const DEFAULT_SHOULDER_COVERAGE: f32 = 0.38;
pub const DEFAULT_WAIST_RATIO: f32 = 0.75;
pub const DEFAULT_HIP_RATIO: f32 = 0.95;
pub const DEFAULT_WRAP_DEPTH: f32 = 0.8;
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.3;

// ==============================================================================
// Torso Measurements
// ==============================================================================

/// Torso axes and extents derived from the four anchors, in world units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsoFrame {
    pub shoulder_center: GridPoint,
    pub hip_center: GridPoint,
    pub spine_length: f32,
    pub spine_dir: GridVector,
    pub shoulder_width: f32,
    /// Unit vector from the right shoulder towards the left shoulder
    pub right_dir: GridVector,
    pub neck_offset: f32,
    pub hem_offset: f32,
    pub top_center: GridPoint,
    pub bottom_center: GridPoint,
}

impl TorsoFrame {
    /// Vector from the collar to the hem
    pub fn span(&self) -> GridVector {
        self.bottom_center - self.top_center
    }
}

/// Garment widths at the collar, waist and hem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidthProfile {
    pub top: f32,
    pub waist: f32,
    pub hip: f32,
}

impl WidthProfile {
    pub fn from_shoulders(shoulder_width: f32, config: &DrapeConfig) -> Self {
        let top = shoulder_width / config.shoulder_coverage;
        Self {
            top,
            waist: top * config.waist_ratio,
            hip: top * config.hip_ratio,
        }
    }

    /// Row width at vertical ratio `v` (0 = collar, 1 = hem), piecewise linear through the waist
    pub fn width_at(&self, v: f32) -> f32 {
        if v < 0.5 {
            let t = v * 2.0;
            self.top * (1.0 - t) + self.waist * t
        } else {
            let t = (v - 0.5) * 2.0;
            self.waist * (1.0 - t) + self.hip * t
        }
    }
}

// ==============================================================================
// Deformation State
// ==============================================================================

/// Previous frame's smoothed position for every control point, logical order
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationState {
    points: [GridPoint; GRID_POINTS],
}

impl DeformationState {
    pub fn new() -> Self {
        Self {
            points: [GridPoint::origin(); GRID_POINTS],
        }
    }

    /// Move every point `factor` of the way towards its target
    fn blend_towards(&mut self, targets: &[GridPoint; GRID_POINTS], factor: f32) {
        for (point, target) in self.points.iter_mut().zip(targets.iter()) {
            *point = point.lerp(target, factor);
        }
    }

    /// Points reordered into the renderer's left-to-right vertex order
    fn to_geometry_order(&self) -> [GridPoint; GRID_POINTS] {
        let mut out = [GridPoint::origin(); GRID_POINTS];
        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLUMNS {
                out[logical_to_geometry_index(row, col)] = self.points[row * GRID_COLUMNS + col];
            }
        }
        out
    }
}

impl Default for DeformationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one engine step
#[derive(Debug, Clone, PartialEq)]
pub enum DrapeOutcome {
    /// Anchors missing; nothing is drawn this frame
    Hidden,
    /// Smoothed positions in renderer vertex order
    Visible(Box<[GridPoint; GRID_POINTS]>),
}

impl DrapeOutcome {
    pub fn is_visible(&self) -> bool {
        matches!(self, DrapeOutcome::Visible(_))
    }
}

// ==============================================================================
// Drape Engine
// ==============================================================================

/// Owns the smoothing history; one engine per mirror view
pub struct DrapeEngine {
    config: DrapeConfig,
    aspect_ratio: f32,
    state: DeformationState,
    visible: bool,
}

impl DrapeEngine {
    pub fn new(config: DrapeConfig, aspect_ratio: f32) -> Self {
        Self {
            config,
            aspect_ratio,
            state: DeformationState::new(),
            visible: false,
        }
    }

    pub fn config(&self) -> &DrapeConfig {
        &self.config
    }

    /// Visibility decided by the latest `update`
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Map a normalized landmark into mirrored world space; depth is ignored
    pub fn map_to_world(&self, landmark: &Landmark) -> GridPoint {
        let visible_height = self.config.visible_height;
        let visible_width = visible_height * self.aspect_ratio;
        GridPoint::new(
            (0.5 - landmark.x) * visible_width,
            -(landmark.y - 0.5) * visible_height,
            0.0,
        )
    }

    pub fn torso_frame(&self, anchors: &TorsoAnchors) -> TorsoFrame {
        let left_shoulder = self.map_to_world(&anchors.left_shoulder);
        let right_shoulder = self.map_to_world(&anchors.right_shoulder);
        let left_hip = self.map_to_world(&anchors.left_hip);
        let right_hip = self.map_to_world(&anchors.right_hip);

        let shoulder_center = nalgebra::center(&left_shoulder, &right_shoulder);
        let hip_center = nalgebra::center(&left_hip, &right_hip);
        let spine = hip_center - shoulder_center;
        let spine_length = spine.norm();
        let spine_dir = unit_or_zero(spine);

        let shoulder_vec = left_shoulder - right_shoulder;
        let shoulder_width = shoulder_vec.norm();
        let right_dir = unit_or_zero(shoulder_vec);

        let neck_offset = spine_length * self.config.neck_extension;
        let hem_offset = spine_length * self.config.hem_extension;

        TorsoFrame {
            shoulder_center,
            hip_center,
            spine_length,
            spine_dir,
            shoulder_width,
            right_dir,
            neck_offset,
            hem_offset,
            top_center: shoulder_center - spine_dir * neck_offset,
            bottom_center: hip_center + spine_dir * hem_offset,
        }
    }

    /// Unsmoothed target for every control point in logical order
    /// (row-major, column 0 at the garment's visual right edge)
    pub fn target_positions(&self, anchors: &TorsoAnchors) -> [GridPoint; GRID_POINTS] {
        let torso = self.torso_frame(anchors);
        let widths = WidthProfile::from_shoulders(torso.shoulder_width, &self.config);
        let span = torso.span();

        let mut targets = [GridPoint::origin(); GRID_POINTS];
        for row in 0..GRID_ROWS {
            let v = row as f32 / (GRID_ROWS - 1) as f32;
            let row_center = torso.top_center + span * v;
            let half_width = widths.width_at(v) * 0.5;

            for col in 0..GRID_COLUMNS {
                let u = col as f32 / (GRID_COLUMNS - 1) as f32;
                let h = (u - 0.5) * 2.0;

                let mut pos = row_center + torso.right_dir * (h * half_width);
                pos.z -= h * h * self.config.wrap_depth;

                targets[row * GRID_COLUMNS + col] = pos;
            }
        }

        targets
    }

    /// Advance one frame. With any anchor missing the mesh is hidden and the
    /// smoothing history is left untouched.
    pub fn update(&mut self, pose: Option<&PoseFrame>) -> DrapeOutcome {
        let anchors = match pose.and_then(|p| p.anchors()) {
            Some(anchors) => anchors,
            None => {
                if self.visible {
                    debug!("Torso anchors lost, hiding garment");
                }
                self.visible = false;
                return DrapeOutcome::Hidden;
            }
        };

        let targets = self.target_positions(&anchors);
        self.state.blend_towards(&targets, self.config.smoothing_factor);

        if !self.visible {
            debug!("Torso anchors acquired, showing garment");
        }
        self.visible = true;

        DrapeOutcome::Visible(Box::new(self.state.to_geometry_order()))
    }
}

/// Unit vector, or zero when the anchors coincide
fn unit_or_zero(v: GridVector) -> GridVector {
    v.try_normalize(f32::EPSILON).unwrap_or_else(GridVector::zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::{BodyLandmark, BODY_LANDMARK_COUNT};

    const ASPECT: f32 = 1280.0 / 720.0;
    const EPS: f32 = 1e-4;

    fn pose_with_anchors(ls: (f32, f32), rs: (f32, f32), lh: (f32, f32), rh: (f32, f32)) -> PoseFrame {
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 0.9); BODY_LANDMARK_COUNT];
        landmarks[BodyLandmark::LeftShoulder.index()] = Landmark::new(ls.0, ls.1, 0.1, 0.9);
        landmarks[BodyLandmark::RightShoulder.index()] = Landmark::new(rs.0, rs.1, -0.1, 0.9);
        landmarks[BodyLandmark::LeftHip.index()] = Landmark::new(lh.0, lh.1, 0.0, 0.9);
        landmarks[BodyLandmark::RightHip.index()] = Landmark::new(rh.0, rh.1, 0.0, 0.9);
        PoseFrame::from_landmarks(landmarks, 0)
    }

    fn upright_pose() -> PoseFrame {
        // Subject faces the camera: their left shoulder is on the image's right
        pose_with_anchors((0.6, 0.3), (0.4, 0.3), (0.58, 0.7), (0.42, 0.7))
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_SMOOTHING_FACTOR, 0.3);
        assert_eq!(DEFAULT_WRAP_DEPTH, 0.8);
        assert_eq!(DEFAULT_VISIBLE_HEIGHT, 4.6);
        assert_eq!(DEFAULT_SHOULDER_COVERAGE, 0.38);
        assert_eq!(DEFAULT_WAIST_RATIO, 0.75);
        assert_eq!(DEFAULT_HIP_RATIO, 0.95);
        assert_eq!(DEFAULT_NECK_EXTENSION, 0.25);
        assert_eq!(DEFAULT_HEM_EXTENSION, 0.25);

        let config = DrapeConfig::default();
        assert_eq!(config.smoothing_factor, DEFAULT_SMOOTHING_FACTOR);
        assert_eq!(config.wrap_depth, DEFAULT_WRAP_DEPTH);
    }

    #[test]
    fn test_map_to_world_mirrors_and_flips() {
        let engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        let visible_width = DEFAULT_VISIBLE_HEIGHT * ASPECT;

        let center = engine.map_to_world(&Landmark::new(0.5, 0.5, 3.0, 1.0));
        assert_eq!(center, GridPoint::origin());

        let corner = engine.map_to_world(&Landmark::new(0.0, 0.0, 0.0, 1.0));
        assert!((corner.x - 0.5 * visible_width).abs() < EPS);
        assert!((corner.y - 0.5 * DEFAULT_VISIBLE_HEIGHT).abs() < EPS);
        assert_eq!(corner.z, 0.0);
    }

    #[test]
    fn test_torso_measurements() {
        let engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        let anchors = upright_pose().anchors().unwrap();
        let torso = engine.torso_frame(&anchors);

        let visible_width = DEFAULT_VISIBLE_HEIGHT * ASPECT;
        let expected_shoulder = 0.2 * visible_width;
        let expected_spine = 0.4 * DEFAULT_VISIBLE_HEIGHT;

        assert!((torso.shoulder_width - expected_shoulder).abs() < EPS);
        assert!((torso.spine_length - expected_spine).abs() < EPS);
        assert!((torso.neck_offset - 0.25 * torso.spine_length).abs() < EPS);
        assert_eq!(torso.neck_offset, torso.hem_offset);

        // Spine points down; the shoulder axis points to screen-left (the subject's left)
        assert!((torso.spine_dir.y + 1.0).abs() < EPS);
        assert!((torso.right_dir.x + 1.0).abs() < EPS);

        assert!((torso.top_center.y - (torso.shoulder_center.y + torso.neck_offset)).abs() < EPS);
        assert!((torso.bottom_center.y - (torso.hip_center.y - torso.hem_offset)).abs() < EPS);
    }

    #[test]
    fn test_width_profile() {
        let config = DrapeConfig::default();
        let shoulder_width = 1.9;
        let widths = WidthProfile::from_shoulders(shoulder_width, &config);

        assert!((widths.top - shoulder_width / DEFAULT_SHOULDER_COVERAGE).abs() < EPS);
        assert!((widths.waist - widths.top * DEFAULT_WAIST_RATIO).abs() < EPS);
        assert!((widths.hip - widths.top * DEFAULT_HIP_RATIO).abs() < EPS);

        assert!((widths.width_at(0.0) - widths.top).abs() < EPS);
        assert!((widths.width_at(0.5) - widths.waist).abs() < EPS);
        assert!((widths.width_at(1.0) - widths.hip).abs() < EPS);
        assert!((widths.width_at(0.25) - (widths.top + widths.waist) / 2.0).abs() < EPS);
    }

    #[test]
    fn test_target_grid_shape() {
        let engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        let anchors = upright_pose().anchors().unwrap();
        let torso = engine.torso_frame(&anchors);
        let widths = WidthProfile::from_shoulders(torso.shoulder_width, engine.config());
        let targets = engine.target_positions(&anchors);

        // Top row spans the full top width around the collar
        let right_edge = targets[0];
        let left_edge = targets[GRID_COLUMNS - 1];
        assert!((nalgebra::distance(&right_edge, &left_edge) - widths.top).abs() < EPS);
        assert!((right_edge.y - torso.top_center.y).abs() < EPS);
        // Column 0 sits on the subject's right, which is screen-right after mirroring
        assert!(right_edge.x > left_edge.x);

        // Parabolic wrap: edges pushed back by the wrap depth, center near zero
        assert!((right_edge.z + DEFAULT_WRAP_DEPTH).abs() < EPS);
        assert!((left_edge.z + DEFAULT_WRAP_DEPTH).abs() < EPS);
        let near_center = targets[4];
        let h = (4.0 / 9.0 - 0.5) * 2.0;
        assert!((near_center.z + h * h * DEFAULT_WRAP_DEPTH).abs() < EPS);

        // Bottom row sits at the hem
        let hem = targets[GRID_POINTS - 1];
        assert!((hem.y - torso.bottom_center.y).abs() < EPS);
    }

    #[test]
    fn test_missing_anchor_hides_and_preserves_state() {
        let mut engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        assert!(engine.update(Some(&upright_pose())).is_visible());
        let before = engine.state.clone();

        for missing in BodyLandmark::ANCHORS {
            let pose = upright_pose().without(missing);
            assert_eq!(engine.update(Some(&pose)), DrapeOutcome::Hidden);
            assert!(!engine.is_visible());
            assert_eq!(engine.state, before);
        }

        assert_eq!(engine.update(None), DrapeOutcome::Hidden);
        assert_eq!(engine.state, before);
    }

    #[test]
    fn test_non_finite_anchor_hides_and_preserves_state() {
        let mut engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        assert!(engine.update(Some(&upright_pose())).is_visible());
        let before = engine.state.clone();

        let broken = pose_with_anchors((f32::NAN, 0.3), (0.4, 0.3), (0.58, 0.7), (0.42, 0.7));
        assert_eq!(engine.update(Some(&broken)), DrapeOutcome::Hidden);
        assert!(!engine.is_visible());
        assert_eq!(engine.state, before);

        // Later good frames keep converging
        for _ in 0..200 {
            engine.update(Some(&upright_pose()));
        }
        assert!(engine
            .state
            .points
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite() && p.z.is_finite()));
    }

    #[test]
    fn test_smoothing_converges_geometrically() {
        let mut engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        let pose = upright_pose();
        let targets = engine.target_positions(&pose.anchors().unwrap());

        for n in 1..=40 {
            engine.update(Some(&pose));
            let decay = (1.0 - DEFAULT_SMOOTHING_FACTOR).powi(n);
            for (point, target) in engine.state.points.iter().zip(targets.iter()) {
                // Starting from the origin, the remaining error is decay * |target|
                let expected = target.coords.norm() * decay;
                assert!((nalgebra::distance(point, target) - expected).abs() < 1e-3);
            }
        }

        for (point, target) in engine.state.points.iter().zip(targets.iter()) {
            assert!(nalgebra::distance(point, target) < 1e-4);
        }
    }

    #[test]
    fn test_output_is_in_renderer_order() {
        let mut config = DrapeConfig::default();
        config.smoothing_factor = 1.0;
        let mut engine = DrapeEngine::new(config, ASPECT);
        let pose = upright_pose();
        let targets = engine.target_positions(&pose.anchors().unwrap());

        let positions = match engine.update(Some(&pose)) {
            DrapeOutcome::Visible(positions) => positions,
            DrapeOutcome::Hidden => panic!("expected a visible drape"),
        };

        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLUMNS {
                assert_eq!(
                    positions[logical_to_geometry_index(row, col)],
                    targets[row * GRID_COLUMNS + col]
                );
            }
            // Renderer order runs left to right across the screen
            let start = row * GRID_COLUMNS;
            assert!(positions[start].x < positions[start + GRID_COLUMNS - 1].x);
        }
    }

    #[test]
    fn test_degenerate_pose_stays_finite() {
        let mut engine = DrapeEngine::new(DrapeConfig::default(), ASPECT);
        let pose = pose_with_anchors((0.5, 0.5), (0.5, 0.5), (0.5, 0.5), (0.5, 0.5));
        match engine.update(Some(&pose)) {
            DrapeOutcome::Visible(positions) => {
                assert!(positions.iter().all(|p| p.x.is_finite() && p.y.is_finite() && p.z.is_finite()));
            }
            DrapeOutcome::Hidden => panic!("all anchors are present"),
        }
    }
}
