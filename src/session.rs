/// Detection session: owns the camera, the pipeline and the event bus, and
/// drives their start/stop lifecycle for the host UI.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::errors::{LightScanError, LightScanResult};
use crate::events::{EventBus, EventEnvelope, SymbolEvent};
use crate::perception::pipeline::{DetectionPipeline, PipelineHandle, PipelineSettings, PipelineStats};
use crate::perception::traits::{CameraSource, ObjectDetector};
use crate::perception::types::Size;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
    Failed { reason: String },
}

pub struct DetectionSession {
    config: AppConfig,
    camera: Box<dyn CameraSource>,
    detector: Arc<dyn ObjectDetector>,
    bus: EventBus,
    pipeline: Option<PipelineHandle>,
    state: SessionState,
}

impl DetectionSession {
    pub fn new(
        config: AppConfig,
        camera: Box<dyn CameraSource>,
        detector: Arc<dyn ObjectDetector>,
    ) -> Self {
        Self {
            config,
            camera,
            detector,
            bus: EventBus::new(uuid::Uuid::new_v4()),
            pipeline: None,
            state: SessionState::Idle,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.bus.session_id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    pub fn stats(&self) -> Option<PipelineStats> {
        self.pipeline.as_ref().map(|p| p.stats())
    }

    /// Forward a new preview size (e.g. after the device rotated).
    pub fn set_display_bounds(&mut self, display: Size) {
        self.config.display.width = display.width;
        self.config.display.height = display.height;
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_display_bounds(display);
        }
    }

    pub async fn start(&mut self) -> LightScanResult<()> {
        if self.state == SessionState::Running {
            return Err(LightScanError::Camera("session already running".into()));
        }

        let pipeline = DetectionPipeline::spawn(
            self.detector.clone(),
            PipelineSettings::from_config(&self.config),
            self.bus.clone(),
        );
        let sink = pipeline.submitter();
        self.bus.publish(SymbolEvent::SessionStarted);

        tracing::info!(
            session = %self.id(),
            camera = %self.camera.name(),
            detector = %self.detector.name(),
            "starting detection session"
        );

        if let Err(e) = self.camera.start(sink).await {
            tracing::error!(session = %self.id(), error = %e, "camera failed to start");
            pipeline.shutdown().await;
            let reason = e.to_string();
            self.bus.publish(SymbolEvent::SessionFailed {
                reason: reason.clone(),
            });
            self.state = SessionState::Failed { reason };
            return Err(e);
        }

        self.pipeline = Some(pipeline);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Stops the camera first so no frame arrives after the pipeline drained.
    pub async fn stop(&mut self) -> Option<PipelineStats> {
        let pipeline = self.pipeline.take()?;
        self.camera.stop().await;
        let stats = pipeline.shutdown().await;
        self.bus.publish(SymbolEvent::SessionStopped { stats });
        self.state = SessionState::Stopped;
        tracing::info!(session = %self.id(), "detection session stopped");
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::perception::pipeline::FrameSubmitter;
    use crate::perception::types::{Detection, Frame, NormalizedRect};

    struct BrokenCamera;

    #[async_trait]
    impl CameraSource for BrokenCamera {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&mut self, _sink: FrameSubmitter) -> LightScanResult<()> {
            Err(LightScanError::Camera("no capture device".into()))
        }

        async fn stop(&mut self) {}
    }

    /// Submits a fixed set of frames synchronously on start.
    struct BurstCamera {
        frames: u64,
    }

    #[async_trait]
    impl CameraSource for BurstCamera {
        fn name(&self) -> &str {
            "burst"
        }

        async fn start(&mut self, sink: FrameSubmitter) -> LightScanResult<()> {
            for id in 0..self.frames {
                sink.submit(Frame::blank(id, 640, 480));
            }
            Ok(())
        }

        async fn stop(&mut self) {}
    }

    struct Fixed;

    #[async_trait]
    impl ObjectDetector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn detect(&self, _frame: &Frame) -> LightScanResult<Vec<Detection>> {
            Ok(vec![Detection::new(
                "tire_pressure",
                0.99,
                NormalizedRect::new(0.1, 0.1, 0.2, 0.2)?,
            )?])
        }
    }

    fn fast_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.detection.confirm_delay_ms = 0;
        cfg
    }

    #[tokio::test]
    async fn camera_failure_reports_session_failed() {
        let mut session = DetectionSession::new(fast_config(), Box::new(BrokenCamera), Arc::new(Fixed));
        let mut rx = session.subscribe();

        assert!(session.start().await.is_err());
        assert!(matches!(session.state(), SessionState::Failed { .. }));

        assert_eq!(rx.recv().await.unwrap().event, SymbolEvent::SessionStarted);
        match rx.recv().await.unwrap().event {
            SymbolEvent::SessionFailed { reason } => assert!(reason.contains("no capture device")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.stop().await.is_none());
    }

    #[tokio::test]
    async fn start_confirm_stop_lifecycle() {
        let mut session = DetectionSession::new(fast_config(), Box::new(BurstCamera { frames: 3 }), Arc::new(Fixed));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        assert_eq!(session.state(), &SessionState::Running);
        assert!(session.start().await.is_err());

        let confirmed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let SymbolEvent::SymbolConfirmed { label, .. } = rx.recv().await.unwrap().event {
                    return label;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(confirmed, "tire_pressure");

        let stats = session.stop().await.unwrap();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.processed + stats.dropped, 3);
        assert_eq!(session.state(), &SessionState::Stopped);

        let stopped = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let SymbolEvent::SessionStopped { stats } = rx.recv().await.unwrap().event {
                    return stats;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stopped, stats);
    }
}
