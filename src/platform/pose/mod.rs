// Pose estimation platform integration
// Provides the landmarker bridge and confidence gating

pub mod mediapipe_bridge;

pub use mediapipe_bridge::{
    parse_landmarker_payload, select_primary_pose, DummyPoseProvider, FeedPoseProvider, PoseFeed,
    PoseGate, PoseProvider,
};
