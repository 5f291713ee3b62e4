// Mirror session runtime
// Drives detection, draping and rendering per frame and carries out the
// capture orchestrator's effects on the tokio runtime

use crate::core::analysis_client::{status_from_result, AnalysisClient, ConversationContext};
use crate::core::capture_orchestrator::{CaptureOrchestrator, Effect, MirrorEvent, MirrorView};
use crate::core::cloth_preprocessor::{prepare_or_original, ClothPreprocessor};
use crate::core::compositor::Compositor;
use crate::core::config::MirrorConfig;
use crate::core::drape_engine::{DrapeEngine, DrapeOutcome};
use crate::models::capture::{CaptureError, RawFrame, Snapshot};
use crate::models::garment::GarmentTexture;
use crate::models::pose::PoseFrame;
use crate::platform::pose::PoseProvider;
use crate::platform::render::{overlay_landmarks, Renderer};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Camera abstraction for `MirrorSession::run`
pub trait VideoSource: Send {
    /// The current camera frame, or `None` if the camera has nothing yet
    fn next_frame(&mut self) -> Option<RawFrame>;
}

/// One mirror view. Must be driven from inside a tokio runtime: timers,
/// preprocessing and analysis calls are spawned tasks whose completions come
/// back as events on a single channel and are applied in arrival order.
pub struct MirrorSession {
    config: MirrorConfig,
    provider: Box<dyn PoseProvider>,
    engine: DrapeEngine,
    renderer: Box<dyn Renderer>,
    compositor: Compositor,
    preprocessor: Arc<dyn ClothPreprocessor>,
    analysis: Arc<dyn AnalysisClient>,
    context: ConversationContext,
    orchestrator: CaptureOrchestrator,

    events_tx: mpsc::UnboundedSender<MirrorEvent>,
    events_rx: mpsc::UnboundedReceiver<MirrorEvent>,
    timers: Vec<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,

    last_frame: Option<RawFrame>,
    last_pose: Option<PoseFrame>,
    last_timestamp_ms: Option<i64>,
    next_upload: u64,
    upload_requested: bool,
}

impl MirrorSession {
    pub fn new(
        config: MirrorConfig,
        provider: Box<dyn PoseProvider>,
        renderer: Box<dyn Renderer>,
        preprocessor: Arc<dyn ClothPreprocessor>,
        analysis: Arc<dyn AnalysisClient>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        info!(
            "Mirror session started ({}x{}, pose: {})",
            config.video.width,
            config.video.height,
            provider.get_model_info()
        );

        Self {
            engine: DrapeEngine::new(config.drape.clone(), config.video.aspect_ratio()),
            compositor: Compositor::new(config.video.width, config.video.height),
            orchestrator: CaptureOrchestrator::new(config.capture.clone()),
            config,
            provider,
            renderer,
            preprocessor,
            analysis,
            context: ConversationContext::default(),
            events_tx,
            events_rx,
            timers: Vec::new(),
            tasks: Vec::new(),
            last_frame: None,
            last_pose: None,
            last_timestamp_ms: None,
            next_upload: 0,
            upload_requested: true,
        }
    }

    pub fn with_context(mut self, context: ConversationContext) -> Self {
        self.context = context;
        self
    }

    pub fn view(&self) -> MirrorView {
        self.orchestrator.view()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.orchestrator.session().snapshot.clone()
    }

    pub fn orchestrator(&self) -> &CaptureOrchestrator {
        &self.orchestrator
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// True until a garment upload starts, and again after a retry
    pub fn upload_requested(&self) -> bool {
        self.upload_requested
    }

    pub fn is_torn_down(&self) -> bool {
        self.orchestrator.is_torn_down()
    }

    // --------------------------------------------------------------------------
    // Frame path
    // --------------------------------------------------------------------------

    /// One render tick: detect, drape, draw, then feed visibility to the
    /// orchestrator. Provider failures count as "no pose" for the frame.
    pub fn on_frame(&mut self, frame: RawFrame, timestamp_ms: i64) {
        if self.is_torn_down() {
            return;
        }

        let timestamp_ms = match self.last_timestamp_ms {
            Some(last) if timestamp_ms <= last => last + 1,
            _ => timestamp_ms,
        };
        self.last_timestamp_ms = Some(timestamp_ms);

        let pose = match self.provider.detect(&frame, timestamp_ms) {
            Ok(pose) => pose,
            Err(e) => {
                warn!("Pose detection failed: {}", e);
                None
            }
        };

        let outcome = self.engine.update(pose.as_ref());
        match (&outcome, self.orchestrator.garment()) {
            (DrapeOutcome::Visible(positions), Some(texture)) => self.renderer.draw(positions, texture),
            _ => self.renderer.hide(),
        }

        self.last_pose = pose;
        self.last_frame = Some(frame);
        self.handle_event(MirrorEvent::Tracking {
            visible: outcome.is_visible(),
        });
    }

    /// Mirrored camera frame with the landmark skeleton, or `None` while the
    /// overlay is suppressed or nobody is tracked
    pub fn overlay_frame(&self) -> Option<RgbaImage> {
        if !self.orchestrator.overlay_enabled() {
            return None;
        }
        let (frame, pose) = (self.last_frame.as_ref()?, self.last_pose.as_ref()?);
        match self.compositor.mirror(frame) {
            Ok(mirrored) => Some(overlay_landmarks(&mirrored, pose)),
            Err(e) => {
                debug!("Skipping overlay: {}", e);
                None
            }
        }
    }

    // --------------------------------------------------------------------------
    // User actions
    // --------------------------------------------------------------------------

    /// Start preparing a garment. Returns the upload id; the garment appears
    /// once its `GarmentReady` event is processed.
    pub fn upload_garment(&mut self, raw: Vec<u8>) -> u64 {
        let upload = self.next_upload;
        self.next_upload += 1;
        self.upload_requested = false;
        self.handle_event(MirrorEvent::UploadStarted { upload });

        let preprocessor = self.preprocessor.clone();
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let prepared = tokio::task::spawn_blocking(move || {
                let prepared = prepare_or_original(preprocessor.as_ref(), &raw);
                GarmentTexture::from_bytes(&prepared.bytes, prepared.degraded)
            })
            .await;

            let event = match prepared {
                Ok(Ok(texture)) => MirrorEvent::GarmentReady { upload, texture },
                Ok(Err(e)) => MirrorEvent::UploadFailed {
                    upload,
                    reason: e.to_string(),
                },
                Err(e) => MirrorEvent::UploadFailed {
                    upload,
                    reason: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
        self.track_task(handle);

        upload
    }

    pub fn retry(&mut self) {
        self.handle_event(MirrorEvent::Retry);
    }

    pub fn ask_again(&mut self) {
        self.handle_event(MirrorEvent::AskAgain);
    }

    /// Leave the view: pending timers and in-flight work are cancelled and
    /// every later event is ignored
    pub fn teardown(&mut self) {
        self.handle_event(MirrorEvent::Teardown);
    }

    // --------------------------------------------------------------------------
    // Event loop
    // --------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: MirrorEvent) {
        self.orchestrator.enqueue(event);
        self.pump();
    }

    /// Wait for the next timer or task completion and apply it
    pub async fn process_next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply every completion that has already arrived, without waiting
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Frame loop at the configured rate until `shutdown` turns true. A frame
    /// that runs late delays the next sample; missed ticks are skipped.
    pub async fn run(&mut self, source: &mut dyn VideoSource, mut shutdown: watch::Receiver<bool>) {
        let fps = self.config.pose.target_fps.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(frame) = source.next_frame() {
                        let timestamp_ms = started.elapsed().as_millis() as i64;
                        self.on_frame(frame, timestamp_ms);
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.teardown();
    }

    fn pump(&mut self) {
        loop {
            let effects = self.orchestrator.process();
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                self.execute(effect);
            }
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::ScheduleCountdownTick { generation, after } => {
                self.schedule(after, MirrorEvent::CountdownTick { generation });
            }
            Effect::ScheduleSettle { generation, after } => {
                self.schedule(after, MirrorEvent::SettleElapsed { generation });
            }
            Effect::CancelTimers => {
                for timer in self.timers.drain(..) {
                    timer.abort();
                }
            }
            Effect::SetOverlay(enabled) => {
                debug!("Landmark overlay {}", if enabled { "on" } else { "off" });
            }
            Effect::CaptureComposite { generation } => {
                let event = match self.capture() {
                    Ok(snapshot) => MirrorEvent::SnapshotReady {
                        generation,
                        snapshot: Arc::new(snapshot),
                    },
                    Err(e) => MirrorEvent::CaptureFailed {
                        generation,
                        reason: e.to_string(),
                    },
                };
                self.orchestrator.enqueue(event);
            }
            Effect::DispatchAnalysis { request, snapshot } => {
                info!("Dispatching fit analysis request {}", request);
                let client = self.analysis.clone();
                let context = self.context.clone();
                let tx = self.events_tx.clone();
                let handle = tokio::spawn(async move {
                    let image_uri = snapshot.data_uri();
                    let status = status_from_result(client.analyze(&image_uri, &context).await);
                    let _ = tx.send(MirrorEvent::AnalysisFinished { request, status });
                });
                self.track_task(handle);
            }
            Effect::PromptUpload => {
                info!("Waiting for a new garment upload");
                self.upload_requested = true;
            }
            Effect::Shutdown => {
                for handle in self.timers.drain(..).chain(self.tasks.drain(..)) {
                    handle.abort();
                }
                self.renderer.hide();
            }
        }
    }

    fn capture(&self) -> Result<Snapshot, CaptureError> {
        let frame = self.last_frame.as_ref().ok_or(CaptureError::NoFrame)?;
        let surface = self.renderer.surface();
        self.compositor.compose(frame, surface.as_ref())
    }

    fn schedule(&mut self, after: Duration, event: MirrorEvent) {
        self.timers.retain(|t| !t.is_finished());
        let tx = self.events_tx.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event);
        }));
    }

    fn track_task(&mut self, handle: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(handle);
    }
}

impl Drop for MirrorSession {
    fn drop(&mut self) {
        for handle in self.timers.iter().chain(self.tasks.iter()) {
            handle.abort();
        }
    }
}
