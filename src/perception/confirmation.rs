/// Confirmation policy: turns per-frame detections into symbol events.
///
/// Time is passed in explicitly so the state machine stays deterministic;
/// the pipeline worker feeds it `Instant::now()` and wakes on
/// [`ConfirmationTracker::next_deadline`].
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DetectionConfig;
use crate::events::{NotIdentifiedReason, SymbolEvent};
use crate::perception::types::{top_detection, Detection};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationPolicy {
    /// A detection is accepted only when its confidence is strictly above this.
    pub threshold: f32,
    /// How long a label must stay accepted before it is confirmed.
    pub confirm_delay: Duration,
    /// Show the indicator if nothing at all was detected within this window.
    pub no_detection_timeout: Duration,
}

impl ConfirmationPolicy {
    pub fn from_config(cfg: &DetectionConfig) -> Self {
        Self {
            threshold: cfg.confidence_threshold,
            confirm_delay: Duration::from_millis(cfg.confirm_delay_ms),
            no_detection_timeout: Duration::from_millis(cfg.no_detection_timeout_ms),
        }
    }

    pub fn accepts(&self, confidence: f32) -> bool {
        confidence > self.threshold
    }
}

#[derive(Debug, Clone)]
struct Pending {
    label: String,
    confidence: f32,
    since: Instant,
}

#[derive(Debug)]
pub struct ConfirmationTracker {
    policy: ConfirmationPolicy,
    started_at: Option<Instant>,
    seen_any: bool,
    timeout_fired: bool,
    pending: Option<Pending>,
    confirmed_label: Option<String>,
    indicator_visible: bool,
}

impl ConfirmationTracker {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self {
            policy,
            started_at: None,
            seen_any: false,
            timeout_fired: false,
            pending: None,
            confirmed_label: None,
            indicator_visible: false,
        }
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    /// Arms the no-detection timeout.
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.seen_any = false;
        self.timeout_fired = false;
    }

    pub fn indicator_visible(&self) -> bool {
        self.indicator_visible
    }

    /// Feed one frame's detections. Returns the events this frame caused,
    /// including any deadline that has passed by `now`.
    ///
    /// Deadlines that expired before this frame are fired first. A frame whose
    /// top detection is not accepted, or that has no detection at all, cancels
    /// the pending confirmation.
    pub fn observe(&mut self, frame_id: u64, detections: &[Detection], now: Instant) -> Vec<SymbolEvent> {
        let mut events = self.poll(now);

        match top_detection(detections) {
            Some(top) if self.policy.accepts(top.confidence) => {
                self.seen_any = true;
                self.hide_indicator(&mut events);
                self.track_accepted(top, now);
            }
            Some(top) => {
                self.seen_any = true;
                tracing::debug!(
                    frame_id,
                    label = %top.label,
                    confidence = top.confidence,
                    threshold = self.policy.threshold,
                    "top detection below threshold"
                );
                self.cancel_pending(frame_id);
                self.show_indicator(
                    NotIdentifiedReason::LowConfidence {
                        label: top.label.clone(),
                        confidence: top.confidence,
                    },
                    &mut events,
                );
            }
            None => self.cancel_pending(frame_id),
        }

        events.extend(self.poll(now));
        events
    }

    /// Fire whatever deadlines have passed by `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<SymbolEvent> {
        let mut events = Vec::new();

        let due = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.since) >= self.policy.confirm_delay);
        if due {
            if let Some(p) = self.pending.take() {
                tracing::info!(label = %p.label, confidence = p.confidence, "symbol confirmed");
                events.push(SymbolEvent::SymbolConfirmed {
                    label: p.label.clone(),
                    confidence: p.confidence,
                });
                self.confirmed_label = Some(p.label);
                self.hide_indicator(&mut events);
            }
        }

        if let Some(deadline) = self.timeout_deadline() {
            if now >= deadline {
                self.timeout_fired = true;
                tracing::info!("no detection before timeout");
                self.show_indicator(NotIdentifiedReason::Timeout, &mut events);
            }
        }

        events
    }

    /// Earliest moment `poll` could produce an event without a new frame.
    pub fn next_deadline(&self) -> Option<Instant> {
        let confirm = self.pending.as_ref().map(|p| p.since + self.policy.confirm_delay);
        match (confirm, self.timeout_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn timeout_deadline(&self) -> Option<Instant> {
        if self.seen_any || self.timeout_fired {
            return None;
        }
        self.started_at.map(|t| t + self.policy.no_detection_timeout)
    }

    fn track_accepted(&mut self, det: &Detection, now: Instant) {
        if let Some(p) = self.pending.as_mut() {
            if p.label == det.label {
                p.confidence = p.confidence.max(det.confidence);
                return;
            }
        }
        // Back on the symbol that was already reported.
        if self.confirmed_label.as_deref() == Some(det.label.as_str()) {
            self.pending = None;
            return;
        }
        tracing::debug!(label = %det.label, confidence = det.confidence, "confirmation pending");
        self.pending = Some(Pending {
            label: det.label.clone(),
            confidence: det.confidence,
            since: now,
        });
    }

    fn cancel_pending(&mut self, frame_id: u64) {
        if let Some(p) = self.pending.take() {
            tracing::debug!(frame_id, label = %p.label, "symbol lost before confirmation");
        }
    }

    fn show_indicator(&mut self, reason: NotIdentifiedReason, events: &mut Vec<SymbolEvent>) {
        if !self.indicator_visible {
            self.indicator_visible = true;
            events.push(SymbolEvent::NotIdentified { reason });
        }
    }

    fn hide_indicator(&mut self, events: &mut Vec<SymbolEvent>) {
        if self.indicator_visible {
            self.indicator_visible = false;
            events.push(SymbolEvent::IndicatorCleared);
        }
    }
}
