use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{CaptureSession, CaptureStage, CapturedPhoto};
use crate::analyzer::{AnalysisLoopStats, FrameAnalysisLoop, FrameMetrics};
use crate::camera::SharedFrameSource;
use crate::config::CaptureConfig;
use crate::detection::CarpetDetector;
use crate::error::{CameraError, CaptureError, CarpetcamError, Result, StoreError};
use crate::events::{CheckinEvent, EventBus};
use crate::gates::{GateEvaluator, GateResult, Orientation};
use crate::observable::Observable;
use crate::storage::{AssetKey, LocalAssetStore, NewAsset};
use crate::sync::{CloudSyncCoordinator, SyncOutcome};
use crate::versioning::{AssetVersionSet, AssetVersioningStrategy};

/// Cancellation scopes of the live session
struct SessionTokens {
    session: CancellationToken,
    /// Gate polling and debounce for the current camera attempt
    attempt: Option<CancellationToken>,
    retry: Option<CancellationToken>,
}

/// Clears the capture flag when the shutter step ends
struct CapturingGuard<'a>(&'a AtomicBool);

impl Drop for CapturingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    config: CaptureConfig,
    source: SharedFrameSource,
    analysis: FrameAnalysisLoop,
    evaluator: GateEvaluator,
    versioning: AssetVersioningStrategy,
    store: Arc<LocalAssetStore>,
    sync: Option<Arc<CloudSyncCoordinator>>,
    detector: Option<Arc<dyn CarpetDetector>>,
    event_bus: Option<Arc<EventBus>>,
    stage: Observable<CaptureStage>,
    session: Observable<Option<CaptureSession>>,
    gates: Observable<GateResult>,
    orientation: Observable<Option<Orientation>>,
    generation: AtomicU64,
    capturing: AtomicBool,
    camera_held: AtomicBool,
    tokens: Mutex<Option<SessionTokens>>,
    last_sync: Mutex<Option<JoinHandle<SyncOutcome>>>,
}

/// Check-in state machine.
///
/// Owns the frame source for the lifetime of a session, polls the gates
/// while waiting, and sequences capture, review, the optional carpet verdict
/// and persistence. Every timer and in-flight step carries the generation of
/// the session that scheduled it and turns into a no-op once that session
/// has been stopped or replaced.
#[derive(Clone)]
pub struct CaptureOrchestrator {
    inner: Arc<Inner>,
}

impl CaptureOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn from_parts(
        config: CaptureConfig,
        source: SharedFrameSource,
        analysis: FrameAnalysisLoop,
        evaluator: GateEvaluator,
        versioning: AssetVersioningStrategy,
        store: Arc<LocalAssetStore>,
        sync: Option<Arc<CloudSyncCoordinator>>,
        detector: Option<Arc<dyn CarpetDetector>>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                analysis,
                evaluator,
                versioning,
                store,
                sync,
                detector,
                event_bus,
                stage: Observable::new(CaptureStage::Initializing),
                session: Observable::new(None),
                gates: Observable::new(GateResult::not_ready()),
                orientation: Observable::new(None),
                generation: AtomicU64::new(0),
                capturing: AtomicBool::new(false),
                camera_held: AtomicBool::new(false),
                tokens: Mutex::new(None),
                last_sync: Mutex::new(None),
            }),
        }
    }

    /// Begin a check-in at `pub_id`, replacing any live session.
    ///
    /// Returns the new session id once the camera step has settled, either
    /// in `WaitingForGates` or in `Failed` with a readable cause.
    pub async fn start_checkin(&self, pub_id: &str, pub_name: &str) -> Result<u64> {
        if pub_id.trim().is_empty() {
            return Err(CarpetcamError::component(
                "capture_orchestrator",
                "Venue id must not be empty",
            ));
        }

        let inner = &self.inner;
        inner.end_session().await;

        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *inner.tokens.lock() = Some(SessionTokens {
            session: CancellationToken::new(),
            attempt: None,
            retry: None,
        });
        inner
            .session
            .set(Some(CaptureSession::new(generation, pub_id, pub_name)));
        inner.stage.set(CaptureStage::Initializing);
        inner.gates.set(GateResult::not_ready());

        info!("Starting check-in session {} at {}", generation, pub_id);
        inner.start_camera(generation).await;
        Ok(generation)
    }

    /// End the live session: cancel timers, release the camera and drop
    /// the session. In-flight work for it becomes a no-op.
    pub async fn stop_checkin(&self) {
        if let Some(session) = self.inner.end_session().await {
            info!(
                "Stopped check-in session {} at {} in stage {}",
                session.session_id, session.pub_id, session.stage
            );
        }
    }

    /// Stop the session and forget orientation, gates and metrics
    pub async fn cleanup(&self) {
        self.stop_checkin().await;
        self.inner.orientation.set(None);
        self.inner.gates.set(GateResult::not_ready());
        self.inner.analysis.reset();
        debug!("Capture orchestrator cleaned up");
    }

    /// Latest device tilt reading; only the newest one is kept
    pub fn update_orientation(&self, orientation: Orientation) {
        self.inner.orientation.set(Some(orientation));
    }

    /// Fire the shutter now, regardless of the gates
    pub async fn trigger_capture(&self) -> std::result::Result<(), CaptureError> {
        let generation = self.inner.active_generation()?;
        self.inner.capture(generation).await
    }

    /// Accept the photo under review and continue to verdict or persistence
    pub async fn confirm_photo(&self) -> std::result::Result<(), CaptureError> {
        let generation = self.inner.active_generation()?;
        self.inner.proceed(generation).await
    }

    /// Discard the photo under review and wait for the gates again
    pub async fn retake(&self) -> std::result::Result<(), CaptureError> {
        let inner = &self.inner;
        let generation = inner.active_generation()?;
        inner
            .claim(
                generation,
                CaptureStage::PhotoReview,
                CaptureStage::WaitingForGates,
                "retake",
            )
            .await?;

        inner.modify_session(generation, |session| session.photo = None);
        inner.analysis.reset();
        Ok(())
    }

    /// Restart the camera step of a failed session
    pub async fn retry(&self) -> std::result::Result<(), CaptureError> {
        let inner = &self.inner;
        let generation = inner.active_generation()?;
        inner
            .claim(
                generation,
                CaptureStage::Failed,
                CaptureStage::CameraStarting,
                "retry",
            )
            .await?;

        inner.cancel_retry();
        info!("Retrying check-in session {}", generation);
        inner.start_camera(generation).await;
        Ok(())
    }

    /// Gates for the latest metrics and orientation, computed now
    pub fn gate_result(&self) -> GateResult {
        self.inner.gate_result()
    }

    pub fn stage(&self) -> CaptureStage {
        self.inner.stage.get()
    }

    pub fn subscribe_stage(&self) -> tokio::sync::watch::Receiver<CaptureStage> {
        self.inner.stage.subscribe()
    }

    pub fn session(&self) -> Option<CaptureSession> {
        self.inner.session.get()
    }

    pub fn subscribe_session(&self) -> tokio::sync::watch::Receiver<Option<CaptureSession>> {
        self.inner.session.subscribe()
    }

    /// Gates as of the last poll
    pub fn subscribe_gates(&self) -> tokio::sync::watch::Receiver<GateResult> {
        self.inner.gates.subscribe()
    }

    pub fn latest_metrics(&self) -> Option<FrameMetrics> {
        self.inner.analysis.latest()
    }

    pub fn subscribe_metrics(&self) -> tokio::sync::watch::Receiver<Option<FrameMetrics>> {
        self.inner.analysis.subscribe()
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.inner.orientation.get()
    }

    pub fn subscribe_orientation(&self) -> tokio::sync::watch::Receiver<Option<Orientation>> {
        self.inner.orientation.subscribe()
    }

    pub fn analysis_stats(&self) -> AnalysisLoopStats {
        self.inner.analysis.stats()
    }

    pub fn store(&self) -> &Arc<LocalAssetStore> {
        &self.inner.store
    }

    /// Resolve once the stage satisfies `predicate`
    pub async fn wait_for_stage<F>(&self, predicate: F) -> CaptureStage
    where
        F: Fn(CaptureStage) -> bool,
    {
        let mut receiver = self.inner.stage.subscribe();
        let stage = match receiver.wait_for(|stage| predicate(*stage)).await {
            Ok(stage) => *stage,
            Err(_) => self.inner.stage.get(),
        };
        stage
    }

    /// Wait for the archive upload started by the last successful save
    pub async fn wait_for_sync(&self) -> Option<SyncOutcome> {
        let handle = self.inner.last_sync.lock().take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Archive sync task ended abnormally: {}", e);
                None
            }
        }
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn active_generation(&self) -> std::result::Result<u64, CaptureError> {
        self.session
            .get()
            .map(|session| session.session_id)
            .filter(|id| self.is_current(*id))
            .ok_or(CaptureError::SessionNotActive)
    }

    /// Apply `f` to the session if it is still the one for `generation`
    fn modify_session<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut CaptureSession) -> R,
    ) -> Option<R> {
        let mut output = None;
        self.session.update(|slot| match slot {
            Some(session) if session.session_id == generation && self.is_current(generation) => {
                output = Some(f(session));
                true
            }
            _ => false,
        });
        output
    }

    fn venue_id(&self, generation: u64) -> String {
        self.session
            .get()
            .filter(|session| session.session_id == generation)
            .map(|session| session.pub_id)
            .unwrap_or_default()
    }

    /// Move the session for `generation` to `to`; false when it is stale
    async fn transition(&self, generation: u64, to: CaptureStage) -> bool {
        let changed = self.modify_session(generation, |session| {
            let from = session.stage;
            session.stage = to;
            (from, session.pub_id.clone())
        });

        let Some((from, venue_id)) = changed else {
            debug!(
                "Ignoring transition to {} for stale session {}",
                to, generation
            );
            return false;
        };

        self.announce(generation, venue_id, from, to).await;
        true
    }

    /// Move from `from` to `to` only if the session is still in `from`.
    ///
    /// The check and the move happen in one session update, so of two
    /// racing callers exactly one wins and the other gets `InvalidTransition`.
    async fn claim(
        &self,
        generation: u64,
        from: CaptureStage,
        to: CaptureStage,
        operation: &str,
    ) -> std::result::Result<(), CaptureError> {
        let claimed = self.modify_session(generation, |session| {
            if session.stage != from {
                return Err(session.stage);
            }
            session.stage = to;
            Ok(session.pub_id.clone())
        });

        match claimed {
            None => Err(CaptureError::SessionNotActive),
            Some(Err(stage)) => Err(CaptureError::InvalidTransition {
                operation: operation.to_string(),
                stage: stage.to_string(),
            }),
            Some(Ok(venue_id)) => {
                self.announce(generation, venue_id, from, to).await;
                Ok(())
            }
        }
    }

    async fn announce(
        &self,
        generation: u64,
        venue_id: String,
        from: CaptureStage,
        to: CaptureStage,
    ) {
        self.stage.set(to);
        if from != to {
            info!("Check-in {} at {}: {} -> {}", generation, venue_id, from, to);
            self.publish(CheckinEvent::StageChanged {
                session_id: generation,
                venue_id,
                from,
                to,
                timestamp: SystemTime::now(),
            })
            .await;
        }
    }

    async fn publish(&self, event: CheckinEvent) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(event).await {
                debug!("Check-in event not delivered: {}", e);
            }
        }
    }

    fn gate_result(&self) -> GateResult {
        self.evaluator
            .evaluate_latest(self.analysis.latest().as_ref(), self.orientation.get())
    }

    fn refresh_gates(&self) -> GateResult {
        let result = self.gate_result();
        self.gates.set(result);
        result
    }

    /// Fresh attempt scope under the session token; cancels the previous one
    fn new_attempt_token(&self, generation: u64) -> Option<CancellationToken> {
        if !self.is_current(generation) {
            return None;
        }
        let mut tokens = self.tokens.lock();
        let tokens = tokens.as_mut()?;
        if let Some(previous) = tokens.attempt.take() {
            previous.cancel();
        }
        let attempt = tokens.session.child_token();
        tokens.attempt = Some(attempt.clone());
        Some(attempt)
    }

    fn new_retry_token(&self, generation: u64) -> Option<CancellationToken> {
        if !self.is_current(generation) {
            return None;
        }
        let mut tokens = self.tokens.lock();
        let tokens = tokens.as_mut()?;
        if let Some(previous) = tokens.retry.take() {
            previous.cancel();
        }
        let retry = tokens.session.child_token();
        tokens.retry = Some(retry.clone());
        Some(retry)
    }

    fn cancel_retry(&self) {
        if let Some(retry) = self.tokens.lock().as_mut().and_then(|t| t.retry.take()) {
            retry.cancel();
        }
    }

    async fn release_camera(&self) {
        if self.camera_held.swap(false, Ordering::AcqRel) {
            self.analysis.stop().await;
            self.source.release().await;
            debug!("Released frame source {}", self.source.name());
        }
    }

    /// Stop gate polling and give the camera back
    async fn end_attempt(&self) {
        let attempt = self.tokens.lock().as_mut().and_then(|t| t.attempt.take());
        if let Some(attempt) = attempt {
            attempt.cancel();
        }
        self.release_camera().await;
    }

    async fn end_session(&self) -> Option<CaptureSession> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let tokens = self.tokens.lock().take();
        if let Some(tokens) = tokens {
            tokens.session.cancel();
        }
        self.release_camera().await;

        let previous = self.session.set(None);
        self.stage.set(CaptureStage::Initializing);

        if let Some(session) = &previous {
            if session.stage != CaptureStage::Initializing {
                self.publish(CheckinEvent::StageChanged {
                    session_id: session.session_id,
                    venue_id: session.pub_id.clone(),
                    from: session.stage,
                    to: CaptureStage::Initializing,
                    timestamp: SystemTime::now(),
                })
                .await;
            }
        }
        previous
    }

    async fn start_camera(self: &Arc<Self>, generation: u64) {
        let Some(attempt) = self.new_attempt_token(generation) else {
            return;
        };
        self.modify_session(generation, |session| {
            session.attempts += 1;
            session.error = None;
            session.photo = None;
        });
        if !self.transition(generation, CaptureStage::CameraStarting).await {
            return;
        }

        match self.source.acquire().await {
            Ok(()) => {
                if !self.is_current(generation) {
                    self.source.release().await;
                    return;
                }
                self.camera_held.store(true, Ordering::Release);
                self.analysis.reset();
                self.analysis.start();

                if self.transition(generation, CaptureStage::WaitingForGates).await {
                    self.spawn_gate_poll(generation, attempt);
                }
            }
            Err(e) => {
                warn!("Could not acquire {}: {}", self.source.name(), e);
                self.fail(generation, e.user_message(), false).await;
            }
        }
    }

    fn spawn_gate_poll(self: &Arc<Self>, generation: u64, token: CancellationToken) {
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !inner.is_current(generation) {
                    break;
                }

                let gates = inner.refresh_gates();
                if inner.stage.get() != CaptureStage::WaitingForGates || !gates.all_gates_passed() {
                    continue;
                }

                if inner.hold_gates(generation, &token).await {
                    if let Err(e) = inner.capture(generation).await {
                        debug!("Auto capture skipped: {}", e);
                    }
                }
            }

            debug!("Gate poll for session {} stopped", generation);
        });
    }

    /// Debounce: true when every gate held for the whole window
    async fn hold_gates(&self, generation: u64, token: &CancellationToken) -> bool {
        if !self.transition(generation, CaptureStage::ConditionsMet).await {
            return false;
        }

        let deadline = Instant::now() + self.config.debounce();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            let wait = self.config.debounce_sample().min(deadline - now);
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }

            if !self.is_current(generation) || self.stage.get() != CaptureStage::ConditionsMet {
                return false;
            }
            let gates = self.refresh_gates();
            if !gates.all_gates_passed() {
                debug!("Gates regressed during debounce: {:?}", gates.failing_gates());
                self.transition(generation, CaptureStage::WaitingForGates).await;
                return false;
            }
        }
    }

    async fn capture(self: &Arc<Self>, generation: u64) -> std::result::Result<(), CaptureError> {
        if self.capturing.swap(true, Ordering::AcqRel) {
            debug!("Capture already in progress, ignoring trigger");
            return Err(CaptureError::AlreadyCapturing);
        }
        let guard = CapturingGuard(&self.capturing);

        if !self.is_current(generation) {
            return Err(CaptureError::SessionNotActive);
        }
        let stage = self.stage.get();
        if !stage.accepts_trigger() {
            return Err(CaptureError::InvalidTransition {
                operation: "capture".to_string(),
                stage: stage.to_string(),
            });
        }
        if !self.transition(generation, CaptureStage::Capturing).await {
            return Err(CaptureError::SessionNotActive);
        }

        let frame = match self.source.grab_frame().await {
            Ok(frame) => frame,
            Err(CameraError::NotReady) => {
                warn!("Frame source not ready at capture, waiting for gates again");
                self.transition(generation, CaptureStage::WaitingForGates).await;
                return Ok(());
            }
            Err(e) => {
                error!("Frame source lost during capture: {}", e);
                self.fail(generation, e.user_message(), false).await;
                return Ok(());
            }
        };

        let (frame_id, width, height) = (frame.id, frame.width, frame.height);
        let photo = CapturedPhoto::new(frame);
        if self
            .modify_session(generation, |session| session.photo = Some(photo))
            .is_none()
        {
            return Err(CaptureError::SessionNotActive);
        }

        self.publish(CheckinEvent::CaptureCompleted {
            session_id: generation,
            venue_id: self.venue_id(generation),
            frame_id,
            width,
            height,
        })
        .await;

        if !self.transition(generation, CaptureStage::PhotoReview).await {
            return Err(CaptureError::SessionNotActive);
        }
        drop(guard);

        if self.config.auto_confirm {
            self.proceed(generation).await?;
        }
        Ok(())
    }

    /// From `PhotoReview` through the verdict to persistence
    async fn proceed(self: &Arc<Self>, generation: u64) -> std::result::Result<(), CaptureError> {
        let session = self
            .session
            .get()
            .filter(|session| session.session_id == generation)
            .ok_or(CaptureError::SessionNotActive)?;
        let photo = session
            .photo
            .clone()
            .ok_or_else(|| CaptureError::InvalidTransition {
                operation: "confirm_photo".to_string(),
                stage: session.stage.to_string(),
            })?;

        let detector = self
            .detector
            .as_ref()
            .filter(|_| self.config.detection_enabled)
            .map(Arc::clone);
        let next = if detector.is_some() {
            CaptureStage::VerdictPending
        } else {
            CaptureStage::Processing
        };
        self.claim(generation, CaptureStage::PhotoReview, next, "confirm_photo")
            .await?;

        self.end_attempt().await;

        let versions = match self.versioning.derive(&photo.frame).await {
            Ok(versions) => versions,
            Err(e) => {
                error!("Could not derive asset versions: {}", e);
                self.fail(generation, format!("Could not prepare the photo: {}", e), false)
                    .await;
                return Ok(());
            }
        };
        if !self.is_current(generation) {
            return Err(CaptureError::SessionNotActive);
        }

        if let Some(detector) = detector {
            let verdict = detector.detect(&versions.analysis).await;
            if !self.is_current(generation) {
                debug!("Verdict arrived for stale session {}", generation);
                return Err(CaptureError::SessionNotActive);
            }

            match verdict {
                Ok(verdict) if verdict.detected => {
                    info!(
                        "Carpet confirmed at {} (confidence {:.2})",
                        session.pub_id, verdict.confidence
                    );
                }
                Ok(verdict) => {
                    let reason = format!(
                        "Not a match: no carpet detected (confidence {:.0}%)",
                        verdict.confidence * 100.0
                    );
                    self.fail(generation, reason, true).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Carpet detector failed: {}", e);
                    self.fail(generation, format!("Carpet check unavailable: {}", e), true)
                        .await;
                    return Ok(());
                }
            }

            if !self.transition(generation, CaptureStage::Processing).await {
                return Err(CaptureError::SessionNotActive);
            }
        }

        self.persist(generation, &session, &photo, versions).await;
        Ok(())
    }

    /// Local save first; the archive upload is only started after it succeeded
    async fn persist(
        self: &Arc<Self>,
        generation: u64,
        session: &CaptureSession,
        photo: &CapturedPhoto,
        versions: AssetVersionSet,
    ) {
        let captured_at_ms = photo.captured_at_ms();
        let saved = self
            .save_local(NewAsset {
                pub_id: &session.pub_id,
                pub_name: &session.pub_name,
                captured_at_ms,
                asset: &versions.local,
            })
            .await;

        let key = match saved {
            Ok(key) => key,
            Err(e) => {
                error!("Local save failed for {}: {}", session.pub_id, e);
                self.fail(
                    generation,
                    format!("Could not save the check-in photo: {}", e),
                    false,
                )
                .await;
                return;
            }
        };

        self.publish(CheckinEvent::AssetSaved {
            key: key.to_string(),
            venue_id: session.pub_id.clone(),
            byte_size: versions.local.byte_size(),
            mime_type: versions.local.mime_type().to_string(),
        })
        .await;
        self.modify_session(generation, |s| s.saved_key = Some(key));

        if let Some(sync) = &self.sync {
            let handle = sync.spawn_after_local_save(
                versions.archive,
                session.pub_id.clone(),
                captured_at_ms,
            );
            *self.last_sync.lock() = Some(handle);
        }

        self.transition(generation, CaptureStage::Success).await;
    }

    async fn save_local(&self, asset: NewAsset<'_>) -> std::result::Result<AssetKey, StoreError> {
        self.store.initialize().await?;
        self.store.save(asset).await
    }

    /// Move to `Failed`; `soft` failures schedule an automatic retry
    fn fail<'a>(
        self: &'a Arc<Self>,
        generation: u64,
        reason: String,
        soft: bool,
    ) -> futures::future::BoxFuture<'a, ()> {
        Box::pin(async move {
            if !self.is_current(generation) {
                return;
            }
            self.end_attempt().await;

            let retry_scheduled = soft && self.config.auto_retry;
            self.modify_session(generation, |session| session.error = Some(reason.clone()));
            if !self.transition(generation, CaptureStage::Failed).await {
                return;
            }
            warn!("Check-in session {} failed: {}", generation, reason);

            self.publish(CheckinEvent::CheckinFailed {
                session_id: generation,
                venue_id: self.venue_id(generation),
                reason,
                retry_scheduled,
            })
            .await;

            if retry_scheduled {
                self.schedule_retry(generation);
            }
        })
    }

    fn schedule_retry(self: &Arc<Self>, generation: u64) {
        let Some(token) = self.new_retry_token(generation) else {
            return;
        };
        let inner = Arc::clone(self);
        let delay = self.config.retry_delay();
        debug!("Retrying session {} in {:?}", generation, delay);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Retry for session {} cancelled", generation);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if inner
                .claim(
                    generation,
                    CaptureStage::Failed,
                    CaptureStage::CameraStarting,
                    "auto_retry",
                )
                .await
                .is_err()
            {
                return;
            }
            info!("Automatic retry for check-in session {}", generation);
            inner.start_camera(generation).await;
        });
    }
}
