// Capture orchestration - countdown, still capture and analysis dispatch
//
// Every input (frame visibility, timer firings, uploads, user actions, async
// completions) arrives as a `MirrorEvent` on a FIFO queue. Processing an event
// yields `Effect`s for the runtime to carry out; the guard that starts a
// countdown is re-evaluated after every event.

use crate::core::config::CaptureConfig;
use crate::models::capture::{AnalysisStatus, CaptureSession, CaptureState, Snapshot};
use crate::models::garment::GarmentTexture;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ==============================================================================
// Events and Effects
// ==============================================================================

#[derive(Debug, Clone)]
pub enum MirrorEvent {
    /// A new garment was chosen; preprocessing has begun
    UploadStarted { upload: u64 },
    /// The garment for `upload` is decoded and ready to draw
    GarmentReady { upload: u64, texture: GarmentTexture },
    /// Neither the prepared nor the original image could be decoded
    UploadFailed { upload: u64, reason: String },
    /// Drape visibility for the latest rendered frame
    Tracking { visible: bool },
    CountdownTick { generation: u64 },
    SettleElapsed { generation: u64 },
    SnapshotReady { generation: u64, snapshot: Arc<Snapshot> },
    CaptureFailed { generation: u64, reason: String },
    AnalysisFinished { request: u64, status: AnalysisStatus },
    Retry,
    AskAgain,
    Teardown,
}

#[derive(Debug, Clone)]
pub enum Effect {
    ScheduleCountdownTick { generation: u64, after: Duration },
    /// Drop any pending countdown tick or settle delay
    CancelTimers,
    SetOverlay(bool),
    ScheduleSettle { generation: u64, after: Duration },
    CaptureComposite { generation: u64 },
    DispatchAnalysis { request: u64, snapshot: Arc<Snapshot> },
    PromptUpload,
    Shutdown,
}

/// Read-only state for a UI layer
#[derive(Debug, Clone, Serialize)]
pub struct MirrorView {
    pub state: CaptureState,
    pub countdown: Option<u8>, // Only the visible numbers, 3..1
    pub body_detected: bool,
    pub overlay_enabled: bool,
    pub garment_loaded: bool,
    pub processing_garment: bool,
    pub has_captured: bool,
    pub includes_garment: Option<bool>,
    pub message: Option<String>,
}

// ==============================================================================
// Orchestrator
// ==============================================================================

/// Transitions kept for inspection
pub const HISTORY_LIMIT: usize = 32;

pub struct CaptureOrchestrator {
    config: CaptureConfig,
    state: CaptureState,
    session: CaptureSession,
    tracking_visible: bool,
    overlay_enabled: bool,
    /// Bumped whenever pending timers or captures become stale
    generation: u64,
    current_upload: Option<u64>,
    next_request: u64,
    pending_request: Option<u64>,
    queue: VecDeque<MirrorEvent>,
    torn_down: bool,
    history: VecDeque<CaptureState>,
}

impl CaptureOrchestrator {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            session: CaptureSession::default(),
            tracking_visible: false,
            overlay_enabled: true,
            generation: 0,
            current_upload: None,
            next_request: 0,
            pending_request: None,
            queue: VecDeque::new(),
            torn_down: false,
            history: VecDeque::from([CaptureState::Idle]),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn garment(&self) -> Option<&GarmentTexture> {
        self.session.cloth_texture.as_ref()
    }

    pub fn has_captured(&self) -> bool {
        self.session.has_captured
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay_enabled
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// The most recent states entered, oldest first, at most `HISTORY_LIMIT`
    pub fn history(&self) -> Vec<CaptureState> {
        self.history.iter().copied().collect()
    }

    pub fn enqueue(&mut self, event: MirrorEvent) {
        self.queue.push_back(event);
    }

    /// Apply queued events in arrival order and collect the resulting effects
    pub fn process(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        while let Some(event) = self.queue.pop_front() {
            if self.torn_down {
                debug!("Dropping {} after teardown", event_name(&event));
                continue;
            }
            self.apply(event, &mut effects);
            self.evaluate_guard(&mut effects);
        }
        effects
    }

    /// Enqueue one event and process the queue
    pub fn handle(&mut self, event: MirrorEvent) -> Vec<Effect> {
        self.enqueue(event);
        self.process()
    }

    /// The countdown guard: garment loaded, body visible, nothing captured yet
    /// for this garment, and no countdown or capture in progress
    pub fn guard_satisfied(&self) -> bool {
        !self.torn_down
            && self.session.cloth_texture.is_some()
            && self.tracking_visible
            && !self.session.has_captured
            && self.state.is_waiting()
    }

    pub fn view(&self) -> MirrorView {
        MirrorView {
            state: self.state,
            countdown: match self.state {
                CaptureState::CountdownActive(n) if n > 0 => Some(n),
                _ => None,
            },
            body_detected: self.tracking_visible,
            overlay_enabled: self.overlay_enabled,
            garment_loaded: self.session.cloth_texture.is_some(),
            processing_garment: self.session.processing_garment,
            has_captured: self.session.has_captured,
            includes_garment: self.session.snapshot.as_ref().map(|s| s.includes_garment),
            message: self.session.message(),
        }
    }

    // --------------------------------------------------------------------------
    // Transitions
    // --------------------------------------------------------------------------

    fn apply(&mut self, event: MirrorEvent, effects: &mut Vec<Effect>) {
        match event {
            MirrorEvent::UploadStarted { upload } => {
                self.reset_for_upload(effects);
                self.current_upload = Some(upload);
                self.session.processing_garment = true;
            }
            MirrorEvent::GarmentReady { upload, texture } => {
                if self.current_upload != Some(upload) {
                    debug!("Ignoring garment from superseded upload {}", upload);
                    return;
                }
                self.reset_for_upload(effects);
                info!(
                    "Garment {} loaded ({}x{}{})",
                    texture.id,
                    texture.width(),
                    texture.height(),
                    if texture.degraded { ", unprocessed" } else { "" }
                );
                self.session.cloth_texture = Some(texture);
            }
            MirrorEvent::UploadFailed { upload, reason } => {
                if self.current_upload == Some(upload) {
                    warn!("Garment upload {} failed: {}", upload, reason);
                    self.session.processing_garment = false;
                }
            }
            MirrorEvent::Tracking { visible } => {
                self.tracking_visible = visible;
                if !visible && self.config.cancel_countdown_on_tracking_loss {
                    if let CaptureState::CountdownActive(_) = self.state {
                        info!("Body lost during countdown, cancelling");
                        self.generation += 1;
                        effects.push(Effect::CancelTimers);
                        self.transition(CaptureState::Idle);
                    }
                }
            }
            MirrorEvent::CountdownTick { generation } => {
                let remaining = match self.state {
                    CaptureState::CountdownActive(n) if generation == self.generation && n > 0 => n,
                    _ => {
                        debug!("Ignoring stale countdown tick");
                        return;
                    }
                };
                let next = remaining - 1;
                self.transition(CaptureState::CountdownActive(next));
                if next == 0 {
                    self.begin_capture(effects);
                } else {
                    effects.push(Effect::ScheduleCountdownTick {
                        generation: self.generation,
                        after: self.tick_interval(),
                    });
                }
            }
            MirrorEvent::SettleElapsed { generation } => {
                if self.is_current_capture(generation) {
                    effects.push(Effect::CaptureComposite { generation });
                }
            }
            MirrorEvent::SnapshotReady {
                generation,
                snapshot,
            } => {
                if !self.is_current_capture(generation) {
                    return;
                }
                self.session.snapshot = Some(snapshot.clone());
                self.session.has_captured = true;
                self.transition(CaptureState::ShowingResult);
                self.set_overlay(true, effects);
                self.dispatch_analysis(snapshot, effects);
            }
            MirrorEvent::CaptureFailed { generation, reason } => {
                if !self.is_current_capture(generation) {
                    return;
                }
                warn!("Capture failed: {}", reason);
                self.transition(CaptureState::Idle);
                self.set_overlay(true, effects);
            }
            MirrorEvent::AnalysisFinished { request, status } => {
                if self.pending_request != Some(request) || self.state != CaptureState::ShowingResult {
                    debug!("Ignoring analysis response {} for a discarded capture", request);
                    return;
                }
                if let AnalysisStatus::Warning(error) = &status {
                    warn!("Analysis returned an error: {}", error);
                }
                self.pending_request = None;
                self.session.analysis = Some(status);
            }
            MirrorEvent::Retry => {
                if self.state != CaptureState::ShowingResult {
                    debug!("Retry ignored in state {}", self.state.to_string());
                    return;
                }
                self.generation += 1;
                self.pending_request = None;
                self.session.discard_capture();
                self.transition(CaptureState::Retrying);
                effects.push(Effect::PromptUpload);
            }
            MirrorEvent::AskAgain => {
                if self.state != CaptureState::ShowingResult {
                    debug!("Ask again ignored in state {}", self.state.to_string());
                    return;
                }
                if let Some(snapshot) = self.session.snapshot.clone() {
                    self.dispatch_analysis(snapshot, effects);
                }
            }
            MirrorEvent::Teardown => {
                info!("Tearing down capture orchestration");
                self.torn_down = true;
                self.generation += 1;
                self.pending_request = None;
                effects.push(Effect::CancelTimers);
                effects.push(Effect::Shutdown);
            }
        }
    }

    fn evaluate_guard(&mut self, effects: &mut Vec<Effect>) {
        if !self.guard_satisfied() {
            return;
        }
        let start = self.config.countdown_start;
        info!("Body and garment in view, starting {}s countdown", start);
        self.transition(CaptureState::CountdownActive(start));
        effects.push(Effect::ScheduleCountdownTick {
            generation: self.generation,
            after: self.tick_interval(),
        });
    }

    /// Any upload discards in-flight countdowns, captures and analysis
    fn reset_for_upload(&mut self, effects: &mut Vec<Effect>) {
        if matches!(
            self.state,
            CaptureState::CountdownActive(_) | CaptureState::Capturing
        ) {
            effects.push(Effect::CancelTimers);
        }
        self.generation += 1;
        self.pending_request = None;
        self.session = CaptureSession::default();
        self.set_overlay(true, effects);
        if self.state != CaptureState::Idle {
            self.transition(CaptureState::Idle);
        }
    }

    fn begin_capture(&mut self, effects: &mut Vec<Effect>) {
        self.transition(CaptureState::Capturing);
        self.set_overlay(false, effects);
        effects.push(Effect::ScheduleSettle {
            generation: self.generation,
            after: Duration::from_millis(self.config.settle_delay_ms),
        });
    }

    fn dispatch_analysis(&mut self, snapshot: Arc<Snapshot>, effects: &mut Vec<Effect>) {
        let request = self.next_request;
        self.next_request += 1;
        self.pending_request = Some(request);
        self.session.analysis = Some(AnalysisStatus::Pending);
        effects.push(Effect::DispatchAnalysis { request, snapshot });
    }

    fn set_overlay(&mut self, enabled: bool, effects: &mut Vec<Effect>) {
        if self.overlay_enabled != enabled {
            self.overlay_enabled = enabled;
            effects.push(Effect::SetOverlay(enabled));
        }
    }

    fn is_current_capture(&self, generation: u64) -> bool {
        generation == self.generation && self.state == CaptureState::Capturing
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.tick_interval_ms)
    }

    fn transition(&mut self, next: CaptureState) {
        debug!("{} -> {}", self.state.to_string(), next.to_string());
        self.state = next;
        self.session.countdown_remaining = match next {
            CaptureState::CountdownActive(n) => Some(n),
            _ => None,
        };
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(next);
    }
}

fn event_name(event: &MirrorEvent) -> &'static str {
    match event {
        MirrorEvent::UploadStarted { .. } => "upload_started",
        MirrorEvent::GarmentReady { .. } => "garment_ready",
        MirrorEvent::UploadFailed { .. } => "upload_failed",
        MirrorEvent::Tracking { .. } => "tracking",
        MirrorEvent::CountdownTick { .. } => "countdown_tick",
        MirrorEvent::SettleElapsed { .. } => "settle_elapsed",
        MirrorEvent::SnapshotReady { .. } => "snapshot_ready",
        MirrorEvent::CaptureFailed { .. } => "capture_failed",
        MirrorEvent::AnalysisFinished { .. } => "analysis_finished",
        MirrorEvent::Retry => "retry",
        MirrorEvent::AskAgain => "ask_again",
        MirrorEvent::Teardown => "teardown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbaImage;

    fn texture() -> GarmentTexture {
        GarmentTexture::new(RgbaImage::new(8, 8))
    }

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot {
            image: RgbaImage::new(4, 4),
            png: vec![0x89, b'P', b'N', b'G'],
            includes_garment: true,
            captured_at: Utc::now(),
        })
    }

    fn loaded(config: CaptureConfig) -> CaptureOrchestrator {
        let mut orch = CaptureOrchestrator::new(config);
        orch.handle(MirrorEvent::UploadStarted { upload: 1 });
        orch.handle(MirrorEvent::GarmentReady {
            upload: 1,
            texture: texture(),
        });
        orch
    }

    fn tick_generation(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleCountdownTick { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn settle_generation(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleSettle { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn dispatched(effects: &[Effect]) -> Vec<u64> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::DispatchAnalysis { request, .. } => Some(*request),
                _ => None,
            })
            .collect()
    }

    /// Drive from body detection through to a dispatched analysis request
    fn run_to_result(orch: &mut CaptureOrchestrator) -> (Vec<Effect>, u64) {
        let mut all = Vec::new();
        let mut effects = orch.handle(MirrorEvent::Tracking { visible: true });
        all.extend(effects.clone());

        while let Some(generation) = tick_generation(&effects) {
            effects = orch.handle(MirrorEvent::CountdownTick { generation });
            all.extend(effects.clone());
        }

        let generation = settle_generation(&effects).expect("settle scheduled");
        effects = orch.handle(MirrorEvent::SettleElapsed { generation });
        all.extend(effects.clone());
        assert!(matches!(effects.as_slice(), [Effect::CaptureComposite { .. }]));

        effects = orch.handle(MirrorEvent::SnapshotReady {
            generation,
            snapshot: snapshot(),
        });
        all.extend(effects.clone());
        (all, generation)
    }

    #[test]
    fn test_guard_requires_all_inputs() {
        let mut orch = CaptureOrchestrator::new(CaptureConfig::default());

        // Body without garment
        orch.handle(MirrorEvent::Tracking { visible: true });
        assert_eq!(orch.state(), CaptureState::Idle);

        // Garment still processing
        orch.handle(MirrorEvent::UploadStarted { upload: 7 });
        orch.handle(MirrorEvent::Tracking { visible: true });
        assert_eq!(orch.state(), CaptureState::Idle);
        assert!(orch.view().processing_garment);

        // Garment ready while body visible arms immediately
        let effects = orch.handle(MirrorEvent::GarmentReady {
            upload: 7,
            texture: texture(),
        });
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));
        assert!(tick_generation(&effects).is_some());
    }

    #[test]
    fn test_no_countdown_without_body() {
        let mut orch = loaded(CaptureConfig::default());
        orch.handle(MirrorEvent::Tracking { visible: false });
        assert_eq!(orch.state(), CaptureState::Idle);
        assert!(!orch.guard_satisfied());
    }

    #[test]
    fn test_countdown_sequence_and_single_capture() {
        let mut orch = loaded(CaptureConfig::default());
        let (effects, _) = run_to_result(&mut orch);

        assert_eq!(
            orch.history(),
            &[
                CaptureState::Idle,
                CaptureState::CountdownActive(3),
                CaptureState::CountdownActive(2),
                CaptureState::CountdownActive(1),
                CaptureState::CountdownActive(0),
                CaptureState::Capturing,
                CaptureState::ShowingResult,
            ]
        );

        let ticks: Vec<Duration> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::ScheduleCountdownTick { after, .. } => Some(*after),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![Duration::from_secs(1); 3]);

        let captures = effects
            .iter()
            .filter(|e| matches!(e, Effect::CaptureComposite { .. }))
            .count();
        assert_eq!(captures, 1);
        assert_eq!(dispatched(&effects).len(), 1);
        assert!(orch.has_captured());
        assert_eq!(orch.view().message.as_deref(), Some("Analyzing your fit..."));
    }

    #[test]
    fn test_overlay_suppressed_while_capturing() {
        let mut orch = loaded(CaptureConfig::default());
        let mut effects = orch.handle(MirrorEvent::Tracking { visible: true });
        while let Some(generation) = tick_generation(&effects) {
            effects = orch.handle(MirrorEvent::CountdownTick { generation });
        }
        assert_eq!(orch.state(), CaptureState::Capturing);
        assert!(!orch.overlay_enabled());
        assert!(effects.iter().any(|e| matches!(e, Effect::SetOverlay(false))));
        let settle = effects.iter().find_map(|e| match e {
            Effect::ScheduleSettle { after, .. } => Some(*after),
            _ => None,
        });
        assert_eq!(settle, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_no_second_countdown_after_capture() {
        let mut orch = loaded(CaptureConfig::default());
        run_to_result(&mut orch);

        for visible in [false, true, false, true] {
            let effects = orch.handle(MirrorEvent::Tracking { visible });
            assert!(tick_generation(&effects).is_none());
        }
        assert_eq!(orch.state(), CaptureState::ShowingResult);
    }

    #[test]
    fn test_error_payload_is_shown_without_retry() {
        let mut orch = loaded(CaptureConfig::default());
        let (effects, _) = run_to_result(&mut orch);
        let request = dispatched(&effects)[0];

        let effects = orch.handle(MirrorEvent::AnalysisFinished {
            request,
            status: AnalysisStatus::Warning("rate limited".to_string()),
        });

        assert!(effects.is_empty());
        assert_eq!(orch.view().message.as_deref(), Some("⚠️ rate limited"));
        assert!(orch.has_captured());
        assert_eq!(orch.state(), CaptureState::ShowingResult);
    }

    #[test]
    fn test_ask_again_reuses_snapshot() {
        let mut orch = loaded(CaptureConfig::default());
        let (effects, _) = run_to_result(&mut orch);
        let first = dispatched(&effects)[0];
        orch.handle(MirrorEvent::AnalysisFinished {
            request: first,
            status: AnalysisStatus::Reply("Cute".to_string()),
        });

        let stored = orch.session().snapshot.clone().unwrap();
        let effects = orch.handle(MirrorEvent::AskAgain);
        let (second, snapshot) = match effects.as_slice() {
            [Effect::DispatchAnalysis { request, snapshot }] => (*request, snapshot.clone()),
            other => panic!("unexpected effects {:?}", other),
        };
        assert_ne!(first, second);
        assert!(Arc::ptr_eq(&stored, &snapshot));
        assert_eq!(orch.view().message.as_deref(), Some("Analyzing your fit..."));

        // A late reply to the first request no longer applies
        orch.handle(MirrorEvent::AnalysisFinished {
            request: first,
            status: AnalysisStatus::Reply("stale".to_string()),
        });
        assert_eq!(orch.view().message.as_deref(), Some("Analyzing your fit..."));

        orch.handle(MirrorEvent::AnalysisFinished {
            request: second,
            status: AnalysisStatus::Reply("Even better".to_string()),
        });
        assert_eq!(orch.view().message.as_deref(), Some("Even better"));
    }

    #[test]
    fn test_retry_rearms_on_next_valid_frame() {
        let mut orch = loaded(CaptureConfig::default());
        run_to_result(&mut orch);

        // Body still visible when retry is pressed
        let effects = orch.handle(MirrorEvent::Retry);
        assert!(effects.iter().any(|e| matches!(e, Effect::PromptUpload)));
        assert!(!orch.has_captured());
        assert!(orch.session().snapshot.is_none());
        assert!(orch.session().analysis.is_none());
        assert!(orch.history().contains(&CaptureState::Retrying));
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));
    }

    #[test]
    fn test_retry_waits_for_body() {
        let mut orch = loaded(CaptureConfig::default());
        run_to_result(&mut orch);
        orch.handle(MirrorEvent::Tracking { visible: false });

        orch.handle(MirrorEvent::Retry);
        assert_eq!(orch.state(), CaptureState::Retrying);

        let effects = orch.handle(MirrorEvent::Tracking { visible: true });
        assert!(tick_generation(&effects).is_some());
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));
    }

    #[test]
    fn test_upload_during_countdown_resets() {
        let mut orch = loaded(CaptureConfig::default());
        let effects = orch.handle(MirrorEvent::Tracking { visible: true });
        let stale = tick_generation(&effects).unwrap();
        orch.handle(MirrorEvent::CountdownTick { generation: stale });
        assert_eq!(orch.state(), CaptureState::CountdownActive(2));

        let effects = orch.handle(MirrorEvent::UploadStarted { upload: 2 });
        assert!(effects.iter().any(|e| matches!(e, Effect::CancelTimers)));
        assert_eq!(orch.state(), CaptureState::Idle);
        assert!(orch.garment().is_none());

        // The old timer firing late has no effect
        orch.handle(MirrorEvent::CountdownTick { generation: stale });
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[test]
    fn test_upload_after_capture_discards_session() {
        let mut orch = loaded(CaptureConfig::default());
        let (effects, _) = run_to_result(&mut orch);
        let request = dispatched(&effects)[0];

        orch.handle(MirrorEvent::UploadStarted { upload: 2 });
        assert!(!orch.has_captured());
        assert_eq!(orch.state(), CaptureState::Idle);

        orch.handle(MirrorEvent::AnalysisFinished {
            request,
            status: AnalysisStatus::Reply("too late".to_string()),
        });
        assert!(orch.view().message.is_none());
    }

    #[test]
    fn test_superseded_upload_ignored() {
        let mut orch = CaptureOrchestrator::new(CaptureConfig::default());
        orch.handle(MirrorEvent::UploadStarted { upload: 1 });
        orch.handle(MirrorEvent::UploadStarted { upload: 2 });
        orch.handle(MirrorEvent::GarmentReady {
            upload: 1,
            texture: texture(),
        });
        assert!(orch.garment().is_none());
        orch.handle(MirrorEvent::GarmentReady {
            upload: 2,
            texture: texture(),
        });
        assert!(orch.garment().is_some());
    }

    #[test]
    fn test_upload_failure_clears_processing() {
        let mut orch = CaptureOrchestrator::new(CaptureConfig::default());
        orch.handle(MirrorEvent::UploadStarted { upload: 1 });
        orch.handle(MirrorEvent::UploadFailed {
            upload: 1,
            reason: "unsupported format".to_string(),
        });
        assert!(!orch.view().processing_garment);
        assert!(!orch.view().garment_loaded);
    }

    #[test]
    fn test_tracking_loss_continues_countdown_by_default() {
        let mut orch = loaded(CaptureConfig::default());
        let effects = orch.handle(MirrorEvent::Tracking { visible: true });
        let generation = tick_generation(&effects).unwrap();

        let effects = orch.handle(MirrorEvent::Tracking { visible: false });
        assert!(effects.is_empty());
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));

        orch.handle(MirrorEvent::CountdownTick { generation });
        assert_eq!(orch.state(), CaptureState::CountdownActive(2));
    }

    #[test]
    fn test_tracking_loss_cancels_when_configured() {
        let config = CaptureConfig {
            cancel_countdown_on_tracking_loss: true,
            ..CaptureConfig::default()
        };
        let mut orch = loaded(config);
        let effects = orch.handle(MirrorEvent::Tracking { visible: true });
        let stale = tick_generation(&effects).unwrap();

        let effects = orch.handle(MirrorEvent::Tracking { visible: false });
        assert!(effects.iter().any(|e| matches!(e, Effect::CancelTimers)));
        assert_eq!(orch.state(), CaptureState::Idle);

        orch.handle(MirrorEvent::CountdownTick { generation: stale });
        assert_eq!(orch.state(), CaptureState::Idle);

        // Regaining the body re-arms from the top
        orch.handle(MirrorEvent::Tracking { visible: true });
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));
    }

    #[test]
    fn test_history_bounded_under_flickering_tracking() {
        let config = CaptureConfig {
            cancel_countdown_on_tracking_loss: true,
            ..CaptureConfig::default()
        };
        let mut orch = loaded(config);
        for i in 0..10_000 {
            orch.handle(MirrorEvent::Tracking { visible: i % 2 == 0 });
        }

        let history = orch.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.last(), Some(&CaptureState::Idle));
        assert_eq!(history[HISTORY_LIMIT - 2], CaptureState::CountdownActive(3));
    }

    #[test]
    fn test_capture_failure_rearms() {
        let mut orch = loaded(CaptureConfig::default());
        let mut effects = orch.handle(MirrorEvent::Tracking { visible: true });
        while let Some(generation) = tick_generation(&effects) {
            effects = orch.handle(MirrorEvent::CountdownTick { generation });
        }
        let generation = settle_generation(&effects).unwrap();

        orch.handle(MirrorEvent::CaptureFailed {
            generation,
            reason: "no video frame".to_string(),
        });
        assert!(!orch.has_captured());
        assert!(orch.overlay_enabled());
        // Body is still visible, so the guard arms a fresh countdown
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));
    }

    #[test]
    fn test_teardown_drops_everything() {
        let mut orch = loaded(CaptureConfig::default());
        let effects = orch.handle(MirrorEvent::Tracking { visible: true });
        let generation = tick_generation(&effects).unwrap();

        let effects = orch.handle(MirrorEvent::Teardown);
        assert!(effects.iter().any(|e| matches!(e, Effect::CancelTimers)));
        assert!(effects.iter().any(|e| matches!(e, Effect::Shutdown)));

        let effects = orch.handle(MirrorEvent::CountdownTick { generation });
        assert!(effects.is_empty());
        assert_eq!(orch.state(), CaptureState::CountdownActive(3));
        assert!(orch.is_torn_down());
        assert!(!orch.guard_satisfied());
    }

    #[test]
    fn test_events_apply_in_queue_order() {
        let mut orch = loaded(CaptureConfig::default());
        orch.enqueue(MirrorEvent::Tracking { visible: true });
        orch.enqueue(MirrorEvent::UploadStarted { upload: 9 });
        let effects = orch.process();

        // Countdown armed by the first event, then cancelled by the upload
        let tick = effects
            .iter()
            .position(|e| matches!(e, Effect::ScheduleCountdownTick { .. }))
            .unwrap();
        let cancel = effects
            .iter()
            .position(|e| matches!(e, Effect::CancelTimers))
            .unwrap();
        assert!(tick < cancel);
        assert_eq!(orch.state(), CaptureState::Idle);
    }
}
