/// Recorded-detection replay: a camera that emits blank frames on a timer and
/// a detector that answers from a JSON-lines recording.
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::errors::{LightScanError, LightScanResult};
use crate::perception::pipeline::{FrameSubmitter, SubmitOutcome};
use crate::perception::traits::{CameraSource, ObjectDetector};
use crate::perception::types::{Detection, Frame};

/// One line of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub frame: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Simulates a detector failure for this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse a JSON-lines recording. Blank lines and `#` comments are skipped.
pub fn parse_recording(content: &str) -> LightScanResult<Vec<RecordedFrame>> {
    let mut frames = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry: RecordedFrame = serde_json::from_str(line)
            .map_err(|e| LightScanError::Replay(format!("line {}: {e}", idx + 1)))?;
        for det in &entry.detections {
            det.validate()
                .map_err(|e| LightScanError::Replay(format!("line {}: {e}", idx + 1)))?;
        }
        frames.push(entry);
    }
    Ok(frames)
}

pub fn load_recording(path: &Path) -> LightScanResult<Vec<RecordedFrame>> {
    let content = std::fs::read_to_string(path)?;
    let frames = parse_recording(&content)?;
    tracing::info!(path = %path.display(), frames = frames.len(), "recording loaded");
    Ok(frames)
}

pub struct ReplayDetector {
    frames: HashMap<u64, RecordedFrame>,
}

impl ReplayDetector {
    pub fn new(recording: &[RecordedFrame]) -> Self {
        Self {
            frames: recording.iter().map(|f| (f.frame, f.clone())).collect(),
        }
    }
}

#[async_trait]
impl ObjectDetector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    async fn detect(&self, frame: &Frame) -> LightScanResult<Vec<Detection>> {
        match self.frames.get(&frame.id) {
            Some(RecordedFrame { error: Some(msg), .. }) => Err(LightScanError::Detector(msg.clone())),
            Some(entry) => Ok(entry.detections.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// Emits one blank frame per recording entry, `interval` apart.
pub struct ReplayCamera {
    frame_ids: Vec<u64>,
    width: u32,
    height: u32,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
    done: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl ReplayCamera {
    pub fn new(recording: &[RecordedFrame], width: u32, height: u32, fps: u32) -> Self {
        Self {
            frame_ids: recording.iter().map(|f| f.frame).collect(),
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            stop_flag: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Notified once every frame has been submitted or the camera stopped.
    pub fn completion(&self) -> Arc<Notify> {
        self.done.clone()
    }
}

#[async_trait]
impl CameraSource for ReplayCamera {
    fn name(&self) -> &str {
        "replay"
    }

    async fn start(&mut self, sink: FrameSubmitter) -> LightScanResult<()> {
        if self.task.is_some() {
            return Err(LightScanError::Camera("replay camera already running".into()));
        }
        self.stop_flag.store(false, Ordering::Relaxed);

        let ids = self.frame_ids.clone();
        let (width, height, interval) = (self.width, self.height, self.interval);
        let stop_flag = self.stop_flag.clone();
        let done = self.done.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for id in ids {
                ticker.tick().await;
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                if sink.submit(Frame::blank(id, width, height)) == SubmitOutcome::Closed {
                    tracing::debug!(frame_id = id, "pipeline closed, replay ends early");
                    break;
                }
            }
            done.notify_one();
        }));
        tracing::info!(frames = self.frame_ids.len(), "replay camera started");
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "replay camera task ended abnormally");
            }
        }
    }
}
