use async_trait::async_trait;

use crate::errors::LightScanResult;
use crate::perception::pipeline::FrameSubmitter;
use crate::perception::types::{Detection, Frame};

/// Opaque object detector. Given one frame it returns zero or more
/// detections with boxes normalised to that frame (origin bottom-left).
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, frame: &Frame) -> LightScanResult<Vec<Detection>>;
}

/// Camera capture service. Once started it pushes frames into `sink` at its
/// own rate; `submit` never blocks, so the source never waits on inference.
#[async_trait]
pub trait CameraSource: Send {
    fn name(&self) -> &str;

    async fn start(&mut self, sink: FrameSubmitter) -> LightScanResult<()>;

    async fn stop(&mut self);
}
