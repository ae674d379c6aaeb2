use crate::camera::SharedFrameSource;
use crate::config::AnalysisProfile;
use crate::error::{AnalyzerError, CameraError};
use crate::events::{CheckinEvent, EventBus};
use crate::observable::Observable;

use super::frame_analyzer::FrameAnalyzer;
use super::metrics::FrameMetrics;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for the analysis loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisLoopStats {
    pub analyses: u64,
    /// Ticks dropped because the previous analysis was still running
    pub skipped_in_flight: u64,
    /// Ticks where the source or the frame was not ready
    pub not_ready: u64,
    pub failures: u64,
    pub last_duration_ms: u64,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Analyzed(FrameMetrics),
    SkippedInFlight,
    NotReady,
    /// Analysis finished after a reset; its metrics were dropped
    Discarded,
    Failed(String),
}

struct Shared {
    analyzer: Mutex<FrameAnalyzer>,
    source: SharedFrameSource,
    metrics: Observable<Option<FrameMetrics>>,
    stats: Mutex<AnalysisLoopStats>,
    in_flight: AtomicBool,
    /// Bumped by every reset; analyses started under an older epoch never publish
    epoch: AtomicU64,
    event_bus: Option<Arc<EventBus>>,
}

/// Clears the in-flight flag when the analysis finishes or is dropped
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the [`FrameAnalyzer`] against a frame source on a fixed period.
///
/// Each tick spawns its own task so a slow analysis never delays the timer;
/// a tick that finds the previous analysis still running is skipped.
pub struct FrameAnalysisLoop {
    shared: Arc<Shared>,
    interval: Duration,
    task: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl FrameAnalysisLoop {
    pub fn new(
        profile: AnalysisProfile,
        source: SharedFrameSource,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        let interval = Duration::from_millis(profile.interval_ms.max(1));
        Self {
            shared: Arc::new(Shared {
                analyzer: Mutex::new(FrameAnalyzer::new(profile)),
                source,
                metrics: Observable::new(None),
                stats: Mutex::new(AnalysisLoopStats::default()),
                in_flight: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                event_bus,
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Latest metrics, `None` until the first successful analysis
    pub fn latest(&self) -> Option<FrameMetrics> {
        self.shared.metrics.get()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Option<FrameMetrics>> {
        self.shared.metrics.subscribe()
    }

    pub fn stats(&self) -> AnalysisLoopStats {
        self.shared.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Forget the previous frame, the motion history and the published metrics
    pub fn reset(&self) {
        let shared = &self.shared;
        shared.metrics.update(|slot| {
            shared.epoch.fetch_add(1, Ordering::AcqRel);
            *slot = None;
            true
        });
        shared.analyzer.lock().reset();
    }

    /// Start the periodic task; a second call while running is a no-op
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Frame analysis loop is already running");
            return;
        }

        info!(
            "Starting frame analysis loop on {} every {:?}",
            self.shared.source.name(),
            self.interval
        );

        let token = CancellationToken::new();
        let child = token.clone();
        let shared = Arc::clone(&self.shared);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move {
                            Self::tick(&shared).await;
                        });
                    }
                }
            }

            debug!("Frame analysis loop stopped");
        });

        *task = Some((handle, token));
    }

    /// Stop the periodic task and wait for it to exit
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((handle, token)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                error!("Frame analysis task ended abnormally: {}", e);
            }
            info!("Frame analysis loop stopped");
        }
    }

    /// Run one analysis immediately, honouring the in-flight guard
    pub async fn analyze_now(&self) -> TickOutcome {
        Self::tick(&self.shared).await
    }

    async fn tick(shared: &Arc<Shared>) -> TickOutcome {
        if shared.in_flight.swap(true, Ordering::AcqRel) {
            shared.stats.lock().skipped_in_flight += 1;
            debug!("Previous analysis still running, skipping tick");
            return TickOutcome::SkippedInFlight;
        }
        let _guard = InFlightGuard(&shared.in_flight);
        let epoch = shared.epoch.load(Ordering::Acquire);

        if !shared.source.is_ready() {
            shared.stats.lock().not_ready += 1;
            return TickOutcome::NotReady;
        }

        let frame = match shared.source.grab_frame().await {
            Ok(frame) => frame,
            Err(CameraError::NotReady) => {
                shared.stats.lock().not_ready += 1;
                return TickOutcome::NotReady;
            }
            Err(e) => {
                shared.stats.lock().not_ready += 1;
                debug!("Frame source unavailable for analysis: {}", e);
                return TickOutcome::NotReady;
            }
        };

        let worker = Arc::clone(shared);
        let result = tokio::task::spawn_blocking(move || {
            let mut analyzer = worker.analyzer.lock();
            if worker.epoch.load(Ordering::Acquire) != epoch {
                return None;
            }
            Some(analyzer.analyze(&frame))
        })
        .await;

        match result {
            Ok(None) => Self::discard(epoch),
            Ok(Some(Ok(metrics))) => {
                let published = shared.metrics.update(|slot| {
                    if shared.epoch.load(Ordering::Acquire) != epoch {
                        return false;
                    }
                    *slot = Some(metrics.clone());
                    true
                });
                if !published {
                    return Self::discard(epoch);
                }
                {
                    let mut stats = shared.stats.lock();
                    stats.analyses += 1;
                    stats.last_duration_ms = metrics.analysis_duration_ms;
                }
                debug!(
                    "Analysed frame: sharpness {:.1}, texture {:.1}, motion {:.1}, stable {}",
                    metrics.sharpness,
                    metrics.texture_complexity,
                    metrics.motion_level,
                    metrics.is_stable
                );
                TickOutcome::Analyzed(metrics)
            }
            Ok(Some(Err(AnalyzerError::NotReady { details }))) => {
                shared.stats.lock().not_ready += 1;
                debug!("Frame not ready for analysis: {}", details);
                TickOutcome::NotReady
            }
            Ok(Some(Err(e))) => Self::record_failure(shared, e.to_string()).await,
            Err(e) => Self::record_failure(shared, format!("analysis task failed: {}", e)).await,
        }
    }

    fn discard(epoch: u64) -> TickOutcome {
        debug!("Dropping analysis started before reset (epoch {})", epoch);
        TickOutcome::Discarded
    }

    async fn record_failure(shared: &Arc<Shared>, message: String) -> TickOutcome {
        shared.stats.lock().failures += 1;
        error!("Frame analysis error: {}", message);

        if let Some(event_bus) = &shared.event_bus {
            let _ = event_bus
                .publish(CheckinEvent::SystemError {
                    component: "frame_analysis_loop".to_string(),
                    error: message.clone(),
                })
                .await;
        }
        TickOutcome::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::test_frames::checkerboard;
    use crate::camera::{FrameSource, MockFrameSource};
    use crate::frame::{FrameData, FrameFormat};
    use std::time::SystemTime;

    /// Holds every grab until released, so a reset can land mid-tick
    struct HeldSource {
        frame: FrameData,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl FrameSource for HeldSource {
        fn name(&self) -> &str {
            "held"
        }

        async fn acquire(&self) -> Result<(), CameraError> {
            Ok(())
        }

        async fn release(&self) {}

        async fn grab_frame(&self) -> Result<FrameData, CameraError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.frame.clone())
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    fn fast_profile() -> AnalysisProfile {
        AnalysisProfile {
            interval_ms: 10,
            ..AnalysisProfile::default()
        }
    }

    #[tokio::test]
    async fn test_not_acquired_source_counts_not_ready() {
        let source = Arc::new(MockFrameSource::new(checkerboard(0, 64, 64, 8)));
        let analysis = FrameAnalysisLoop::new(fast_profile(), source, None);

        assert_eq!(analysis.analyze_now().await, TickOutcome::NotReady);
        assert_eq!(analysis.stats().not_ready, 1);
        assert!(analysis.latest().is_none());
    }

    #[tokio::test]
    async fn test_analyze_now_publishes_metrics() {
        let source = Arc::new(MockFrameSource::new(checkerboard(0, 64, 64, 8)));
        source.acquire().await.unwrap();
        let analysis = FrameAnalysisLoop::new(fast_profile(), source, None);
        let mut receiver = analysis.subscribe();

        assert!(matches!(analysis.analyze_now().await, TickOutcome::Analyzed(_)));
        assert!(receiver.has_changed().unwrap());
        let metrics = receiver.borrow_and_update().clone().unwrap();
        assert_eq!(metrics.frame_dimensions, (64, 64));
        assert_eq!(analysis.stats().analyses, 1);
    }

    #[tokio::test]
    async fn test_in_flight_guard_skips_overlapping_tick() {
        let source = Arc::new(MockFrameSource::new(checkerboard(0, 64, 64, 8)));
        source.acquire().await.unwrap();
        let analysis = FrameAnalysisLoop::new(fast_profile(), source, None);

        analysis.shared.in_flight.store(true, Ordering::Release);
        assert_eq!(analysis.analyze_now().await, TickOutcome::SkippedInFlight);
        assert_eq!(analysis.stats().skipped_in_flight, 1);

        analysis.shared.in_flight.store(false, Ordering::Release);
        assert!(matches!(analysis.analyze_now().await, TickOutcome::Analyzed(_)));
        assert!(!analysis.shared.in_flight.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_reset_drops_analysis_already_in_flight() {
        let source = Arc::new(HeldSource {
            frame: checkerboard(0, 64, 64, 8),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let analysis = Arc::new(FrameAnalysisLoop::new(
            fast_profile(),
            Arc::clone(&source) as SharedFrameSource,
            None,
        ));

        let pending = tokio::spawn({
            let analysis = Arc::clone(&analysis);
            async move { analysis.analyze_now().await }
        });
        source.entered.notified().await;

        analysis.reset();
        source.release.notify_one();

        assert_eq!(pending.await.unwrap(), TickOutcome::Discarded);
        assert!(analysis.latest().is_none());
        assert_eq!(analysis.stats().analyses, 0);

        source.release.notify_one();
        assert!(matches!(analysis.analyze_now().await, TickOutcome::Analyzed(_)));
        assert!(analysis.latest().is_some());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_not_ready() {
        let bad = FrameData::new(0, SystemTime::now(), vec![1, 2, 3], 8, 8, FrameFormat::Rgb24);
        let source = Arc::new(MockFrameSource::new(bad));
        source.acquire().await.unwrap();
        let analysis = FrameAnalysisLoop::new(fast_profile(), source, None);

        assert_eq!(analysis.analyze_now().await, TickOutcome::NotReady);
        assert_eq!(analysis.stats().analyses, 0);
    }

    #[tokio::test]
    async fn test_loop_becomes_stable_on_static_scene() {
        let source = Arc::new(MockFrameSource::new(checkerboard(0, 64, 64, 8)));
        source.acquire().await.unwrap();
        let analysis = FrameAnalysisLoop::new(fast_profile(), source, None);
        let mut receiver = analysis.subscribe();

        analysis.start();
        analysis.start();
        assert!(analysis.is_running());

        let stable = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                receiver.changed().await.unwrap();
                if receiver
                    .borrow_and_update()
                    .as_ref()
                    .map(|m| m.is_stable)
                    .unwrap_or(false)
                {
                    break;
                }
            }
        })
        .await;
        assert!(stable.is_ok());

        analysis.stop().await;
        assert!(!analysis.is_running());

        analysis.reset();
        assert!(analysis.latest().is_none());
    }
}
