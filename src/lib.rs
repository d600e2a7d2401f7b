pub mod config;
pub mod errors;
pub mod events;
pub mod perception;
pub mod session;

pub use errors::{LightScanError, LightScanResult};
pub use events::{EventBus, EventEnvelope, NotIdentifiedReason, SymbolEvent};
pub use perception::mapper::{map_to_display, map_to_display_with, Rotation};
pub use perception::types::{Detection, Frame, NormalizedRect, PixelRect, Size};
pub use session::{DetectionSession, SessionState};

/// Install the global tracing subscriber. Logs go to stderr; `RUST_LOG`
/// overrides the default `info` filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
