pub mod core;
pub mod models;
pub mod platform;

use crate::core::analysis_client::{AnalysisClient, AnalysisError, ChatCompletionsClient};
use crate::core::cloth_preprocessor::SmartCropPreprocessor;
use crate::core::config::{ConfigError, MirrorConfig};
use crate::core::mirror_session::MirrorSession;
use crate::models::pose::PoseError;
use crate::platform::pose::{FeedPoseProvider, PoseFeed};
use crate::platform::render::MeshRenderer;
use std::sync::Arc;

pub use crate::core::capture_orchestrator::{MirrorEvent, MirrorView};
pub use crate::core::drape_engine::DrapeEngine;
pub use crate::models::capture::CaptureState;

/// Errors raised while wiring a mirror session together
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pose provider error: {0}")]
    Pose(#[from] PoseError),

    #[error("Analysis client error: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Session with the stock components: landmarks arrive through the returned
/// feed, garments are drawn by the software mesh renderer, and analysis goes
/// to the configured chat completions backend
pub fn build_session(config: MirrorConfig) -> Result<(PoseFeed, MirrorSession), MirrorError> {
    let analysis = Arc::new(ChatCompletionsClient::new(config.analysis.clone())?);
    build_session_with(config, analysis)
}

/// As `build_session`, with a caller-supplied analysis backend
pub fn build_session_with(
    config: MirrorConfig,
    analysis: Arc<dyn AnalysisClient>,
) -> Result<(PoseFeed, MirrorSession), MirrorError> {
    config.validate()?;

    let (feed, provider) = FeedPoseProvider::channel(config.pose.clone())?;
    let renderer = MeshRenderer::new(
        config.video.width,
        config.video.height,
        config.drape.visible_height,
    );
    let preprocessor = Arc::new(SmartCropPreprocessor::new(&config.preprocess));

    let session = MirrorSession::new(
        config,
        Box::new(provider),
        Box::new(renderer),
        preprocessor,
        analysis,
    );
    Ok((feed, session))
}
