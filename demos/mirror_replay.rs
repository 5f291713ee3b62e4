/// Example program that replays a synthetic swaying subject through a mirror session
/// Run with: cargo run --example mirror_replay
/// Set RUST_LOG=debug to see every state transition

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use virtual_mirror::build_session_with;
use virtual_mirror::core::analysis_client::{
    AnalysisClient, AnalysisReply, AnalysisResult, ConversationContext,
};
use virtual_mirror::core::compositor::encode_png;
use virtual_mirror::core::config::{MirrorConfig, VideoConfig};
use virtual_mirror::core::mirror_session::VideoSource;
use virtual_mirror::models::capture::{PixelFormat, RawFrame};
use virtual_mirror::models::pose::{BodyLandmark, Landmark, PoseCandidate, BODY_LANDMARK_COUNT};
use virtual_mirror::platform::pose::PoseFeed;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

/// Stands in for the chat backend so the demo runs offline
struct OfflineStylist;

#[async_trait]
impl AnalysisClient for OfflineStylist {
    async fn analyze(&self, image_uri: &str, _context: &ConversationContext) -> AnalysisResult<AnalysisReply> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(AnalysisReply::Text(format!(
            "Looks sharp! The drape sits well on your shoulders. ({} KB photo)",
            image_uri.len() / 1024
        )))
    }
}

/// Grey camera frames, with a matching landmarker result published per frame
struct SwayingCamera {
    feed: PoseFeed,
    frame: u64,
}

impl SwayingCamera {
    fn landmarks(&self) -> Vec<Landmark> {
        let sway = (self.frame as f32 * 0.08).sin() * 0.04;
        let mut landmarks = vec![Landmark::new(0.5 + sway, 0.5, 0.0, 0.3); BODY_LANDMARK_COUNT];

        let mut set = |landmark: BodyLandmark, x: f32, y: f32| {
            landmarks[landmark.index()] = Landmark::new(x + sway, y, 0.0, 0.95);
        };
        set(BodyLandmark::Nose, 0.5, 0.18);
        set(BodyLandmark::LeftShoulder, 0.6, 0.32);
        set(BodyLandmark::RightShoulder, 0.4, 0.32);
        set(BodyLandmark::LeftElbow, 0.66, 0.5);
        set(BodyLandmark::RightElbow, 0.34, 0.5);
        set(BodyLandmark::LeftHip, 0.57, 0.7);
        set(BodyLandmark::RightHip, 0.43, 0.7);

        landmarks
    }
}

impl VideoSource for SwayingCamera {
    fn next_frame(&mut self) -> Option<RawFrame> {
        self.frame += 1;
        let mut candidate = PoseCandidate::from_landmarks(self.landmarks());
        candidate.score = 0.9;
        candidate.presence = 0.9;
        self.feed.publish(vec![candidate]);

        Some(RawFrame {
            timestamp: self.frame as i64,
            width: WIDTH,
            height: HEIGHT,
            data: vec![96; (WIDTH * HEIGHT * 4) as usize],
            format: PixelFormat::RGBA8,
        })
    }
}

fn striped_shirt() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    // Transparent margin around the garment so the smart crop has work to do
    let shirt = RgbaImage::from_fn(120, 160, |x, y| {
        if !(20..100).contains(&x) || !(10..150).contains(&y) {
            Rgba([0, 0, 0, 0])
        } else if (y / 10) % 2 == 0 {
            Rgba([30, 60, 160, 255])
        } else {
            Rgba([235, 235, 235, 255])
        }
    });
    Ok(encode_png(&shirt)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Virtual Mirror Replay ===\n");

    let config = MirrorConfig {
        video: VideoConfig {
            width: WIDTH,
            height: HEIGHT,
        },
        ..MirrorConfig::default()
    };

    let (feed, mut session) = build_session_with(config, Arc::new(OfflineStylist))?;
    let upload = session.upload_garment(striped_shirt()?);
    println!("Uploaded garment #{}", upload);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(6)).await;
        let _ = shutdown_tx.send(true);
    });

    let mut camera = SwayingCamera { feed, frame: 0 };
    session.run(&mut camera, shutdown_rx).await;

    println!("\nFrames rendered: {}", camera.frame);
    println!("Final view:\n{}", serde_json::to_string_pretty(&session.view())?);

    if let Some(snapshot) = session.snapshot() {
        let path = std::env::temp_dir().join("mirror_replay.png");
        std::fs::write(&path, &snapshot.png)?;
        println!("\nSnapshot written to {}", path.display());
    } else {
        println!("\nNo snapshot was captured");
    }

    Ok(())
}
