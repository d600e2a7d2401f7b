/// Detection pipeline: a single latest-frame slot feeding one inference task.
///
/// The camera side only ever swaps a frame into the slot, so it never waits
/// on inference. A frame that is still waiting when the next one arrives is
/// replaced and counted as dropped; frames are never queued.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::events::{EventBus, SymbolEvent};
use crate::perception::confirmation::{ConfirmationPolicy, ConfirmationTracker};
use crate::perception::mapper::{map_to_display_with, Rotation};
use crate::perception::traits::ObjectDetector;
use crate::perception::types::{top_detection, Detection, Frame, Size};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub processed: u64,
    pub dropped: u64,
    pub detector_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Slot was empty; the frame is next in line.
    Queued,
    /// A waiting frame was discarded in favour of this one.
    Replaced,
    /// Pipeline shut down; the frame was ignored.
    Closed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub policy: ConfirmationPolicy,
    pub rotation: Rotation,
    pub display: Size,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            policy: ConfirmationPolicy::from_config(&cfg.detection),
            rotation: cfg.camera.rotation,
            display: cfg.display.size(),
        }
    }
}

enum NextFrame {
    Frame(Frame),
    Idle,
    Closed,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Option<Frame>>,
    wake: Notify,
    closed: AtomicBool,
    submitted: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    detector_failures: AtomicU64,
}

impl Shared {
    // `closed` is read under the slot lock on both sides, so no frame can be
    // stored after the worker made its final check.
    fn lock_slot(&self) -> MutexGuard<'_, Option<Frame>> {
        // A poisoned slot still holds a valid Option.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_frame(&self) -> NextFrame {
        let mut slot = self.lock_slot();
        match slot.take() {
            Some(frame) => NextFrame::Frame(frame),
            None if self.closed.load(Ordering::Acquire) => NextFrame::Closed,
            None => NextFrame::Idle,
        }
    }

    fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
        }
    }
}

/// Producer-side handle given to camera sources. Cheap to clone.
#[derive(Clone)]
pub struct FrameSubmitter {
    shared: Arc<Shared>,
}

impl FrameSubmitter {
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        let frame_id = frame.id;
        let replaced = {
            let mut slot = self.shared.lock_slot();
            if self.shared.closed.load(Ordering::Acquire) {
                return SubmitOutcome::Closed;
            }
            let replaced = slot.replace(frame);
            self.shared.submitted.fetch_add(1, Ordering::Relaxed);
            if replaced.is_some() {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            replaced
        };
        self.shared.wake.notify_one();

        match replaced {
            Some(old) => {
                tracing::trace!(dropped = old.id, frame_id, "inference busy, frame replaced");
                SubmitOutcome::Replaced
            }
            None => SubmitOutcome::Queued,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

pub struct PipelineHandle {
    shared: Arc<Shared>,
    display_tx: watch::Sender<Size>,
    worker: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn submitter(&self) -> FrameSubmitter {
        FrameSubmitter {
            shared: self.shared.clone(),
        }
    }

    /// Display size used for mapping subsequent frames (e.g. after a rotation).
    pub fn set_display_bounds(&self, display: Size) {
        self.display_tx.send_replace(display);
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    /// Stops accepting frames, lets the worker finish the frame in flight and
    /// the one waiting in the slot, then returns the final counters. Every
    /// accepted frame ends up either processed or dropped.
    pub async fn shutdown(self) -> PipelineStats {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "detection worker ended abnormally");
        }
        let stats = self.shared.stats();
        tracing::info!(
            submitted = stats.submitted,
            processed = stats.processed,
            dropped = stats.dropped,
            detector_failures = stats.detector_failures,
            "detection pipeline stopped"
        );
        stats
    }
}

pub struct DetectionPipeline;

impl DetectionPipeline {
    /// Spawn the inference worker on the current tokio runtime.
    pub fn spawn(
        detector: Arc<dyn ObjectDetector>,
        settings: PipelineSettings,
        bus: EventBus,
    ) -> PipelineHandle {
        let shared = Arc::new(Shared::default());
        let (display_tx, display_rx) = watch::channel(settings.display);

        let worker = Worker {
            detector,
            shared: shared.clone(),
            tracker: ConfirmationTracker::new(settings.policy),
            rotation: settings.rotation,
            display_rx,
            bus,
        };
        tracing::info!(detector = %worker.detector.name(), "spawning detection worker");
        let worker = tokio::spawn(worker.run());

        PipelineHandle {
            shared,
            display_tx,
            worker,
        }
    }
}

struct Worker {
    detector: Arc<dyn ObjectDetector>,
    shared: Arc<Shared>,
    tracker: ConfirmationTracker,
    rotation: Rotation,
    display_rx: watch::Receiver<Size>,
    bus: EventBus,
}

impl Worker {
    async fn run(mut self) {
        self.tracker.start(Instant::now());

        loop {
            match self.shared.next_frame() {
                NextFrame::Frame(frame) => {
                    self.process(frame).await;
                    continue;
                }
                NextFrame::Closed => break,
                NextFrame::Idle => {}
            }

            let deadline = self.tracker.next_deadline();
            tokio::select! {
                _ = self.shared.wake.notified() => {}
                _ = wait_until(deadline) => {
                    for event in self.tracker.poll(Instant::now()) {
                        self.bus.publish(event);
                    }
                }
            }
        }
    }

    async fn process(&mut self, frame: Frame) {
        let started = std::time::Instant::now();

        let detections: Vec<Detection> = match self.detector.detect(&frame).await {
            Ok(found) => found
                .into_iter()
                .filter(|d| match d.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(frame_id = frame.id, error = %e, "discarding malformed detection");
                        false
                    }
                })
                .collect(),
            Err(e) => {
                self.shared.detector_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(frame_id = frame.id, error = %e, "detection failed, treating frame as empty");
                Vec::new()
            }
        };
        self.shared.processed.fetch_add(1, Ordering::Relaxed);

        if let Some(top) = top_detection(&detections) {
            if self.tracker.policy().accepts(top.confidence) {
                let display = *self.display_rx.borrow();
                let rect = map_to_display_with(&top.bbox, frame.buffer_size(), display, self.rotation);
                self.bus.publish(SymbolEvent::Overlay {
                    frame_id: frame.id,
                    label: top.label.clone(),
                    confidence: top.confidence,
                    rect,
                });
            }
        }

        for event in self.tracker.observe(frame.id, &detections, Instant::now()) {
            self.bus.publish(event);
        }

        tracing::debug!(
            frame_id = frame.id,
            detections = detections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "frame processed"
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Semaphore};

    use crate::errors::{LightScanError, LightScanResult};
    use crate::events::{EventEnvelope, NotIdentifiedReason};
    use crate::perception::types::NormalizedRect;

    /// Blocks every call until the test hands out a permit.
    struct GatedDetector {
        gate: Semaphore,
        entered: mpsc::UnboundedSender<u64>,
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ObjectDetector for GatedDetector {
        fn name(&self) -> &str {
            "gated"
        }

        async fn detect(&self, frame: &Frame) -> LightScanResult<Vec<Detection>> {
            let _ = self.entered.send(frame.id);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.seen.lock().unwrap().push(frame.id);
            Ok(Vec::new())
        }
    }

    /// Fails on odd frames, reports a centred symbol on even ones.
    struct FlakyDetector;

    #[async_trait]
    impl ObjectDetector for FlakyDetector {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn detect(&self, frame: &Frame) -> LightScanResult<Vec<Detection>> {
            if frame.id % 2 == 1 {
                return Err(LightScanError::Detector("model hiccup".into()));
            }
            Ok(vec![Detection::new(
                "engine_check",
                0.99,
                NormalizedRect::new(0.4, 0.4, 0.2, 0.2)?,
            )?])
        }
    }

    fn settings(delay_ms: u64, timeout_ms: u64) -> PipelineSettings {
        PipelineSettings {
            policy: ConfirmationPolicy {
                threshold: 0.9,
                confirm_delay: Duration::from_millis(delay_ms),
                no_detection_timeout: Duration::from_millis(timeout_ms),
            },
            rotation: Rotation::Clockwise90,
            display: Size::new(480.0, 640.0),
        }
    }

    async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<EventEnvelope>) -> SymbolEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("bus open")
            .event
    }

    #[tokio::test]
    async fn frames_are_dropped_while_inference_is_busy() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let detector = Arc::new(GatedDetector {
            gate: Semaphore::new(0),
            entered: entered_tx,
            seen: Mutex::new(Vec::new()),
        });
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let handle = DetectionPipeline::spawn(detector.clone(), settings(0, 60_000), bus);
        let sink = handle.submitter();

        assert_eq!(sink.submit(Frame::blank(1, 640, 480)), SubmitOutcome::Queued);
        assert_eq!(entered_rx.recv().await, Some(1));

        assert_eq!(sink.submit(Frame::blank(2, 640, 480)), SubmitOutcome::Queued);
        assert_eq!(sink.submit(Frame::blank(3, 640, 480)), SubmitOutcome::Replaced);
        assert_eq!(sink.submit(Frame::blank(4, 640, 480)), SubmitOutcome::Replaced);
        assert_eq!(sink.submit(Frame::blank(5, 640, 480)), SubmitOutcome::Replaced);

        detector.gate.add_permits(10);
        let stats = handle.shutdown().await;

        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.processed, 2);
        assert_eq!(*detector.seen.lock().unwrap(), vec![1, 5]);
        assert_eq!(sink.submit(Frame::blank(6, 640, 480)), SubmitOutcome::Closed);
    }

    struct Empty;

    #[async_trait]
    impl ObjectDetector for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        async fn detect(&self, _frame: &Frame) -> LightScanResult<Vec<Detection>> {
            tokio::task::yield_now().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_racing_submitters_accounts_for_every_frame() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let handle = DetectionPipeline::spawn(Arc::new(Empty), settings(60_000, 60_000), bus);

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let sink = handle.submitter();
                tokio::spawn(async move {
                    let mut id = p * 1_000_000;
                    while sink.submit(Frame::blank(id, 640, 480)) != SubmitOutcome::Closed {
                        id += 1;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let stats = handle.shutdown().await;
        for producer in producers {
            producer.await.unwrap();
        }

        assert!(stats.submitted > 0);
        assert_eq!(stats.submitted, stats.processed + stats.dropped);
    }

    #[tokio::test]
    async fn accepted_detection_emits_overlay_and_confirmation() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let mut rx = bus.subscribe();
        let handle = DetectionPipeline::spawn(Arc::new(FlakyDetector), settings(0, 60_000), bus);

        handle.submitter().submit(Frame::blank(2, 640, 480));

        match next_event(&mut rx).await {
            SymbolEvent::Overlay { frame_id, label, rect, .. } => {
                assert_eq!(frame_id, 2);
                assert_eq!(label, "engine_check");
                let (cx, cy) = rect.center();
                assert!((cx - 240.0).abs() < 1e-9);
                assert!((cy - 320.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            next_event(&mut rx).await,
            SymbolEvent::SymbolConfirmed {
                label: "engine_check".into(),
                confidence: 0.99
            }
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn detector_failures_do_not_stop_the_pipeline() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let mut rx = bus.subscribe();
        let handle = DetectionPipeline::spawn(Arc::new(FlakyDetector), settings(0, 60_000), bus);
        let sink = handle.submitter();

        sink.submit(Frame::blank(1, 640, 480));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sink.submit(Frame::blank(2, 640, 480));

        assert!(matches!(next_event(&mut rx).await, SymbolEvent::Overlay { frame_id: 2, .. }));
        let stats = handle.shutdown().await;
        assert_eq!(stats.detector_failures, 1);
        assert_eq!(stats.processed, 2);
    }

    #[tokio::test]
    async fn timeout_fires_without_any_frames() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let mut rx = bus.subscribe();
        let handle = DetectionPipeline::spawn(Arc::new(FlakyDetector), settings(0, 20), bus);

        assert_eq!(
            next_event(&mut rx).await,
            SymbolEvent::NotIdentified {
                reason: NotIdentifiedReason::Timeout
            }
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn display_bounds_can_change_between_frames() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let mut rx = bus.subscribe();
        let handle = DetectionPipeline::spawn(Arc::new(FlakyDetector), settings(60_000, 60_000), bus);

        handle.set_display_bounds(Size::new(960.0, 1280.0));
        handle.submitter().submit(Frame::blank(4, 640, 480));

        match next_event(&mut rx).await {
            SymbolEvent::Overlay { rect, .. } => {
                let (cx, cy) = rect.center();
                assert!((cx - 480.0).abs() < 1e-9);
                assert!((cy - 640.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        handle.shutdown().await;
    }
}
