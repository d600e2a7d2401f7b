pub mod annotator;
pub mod confirmation;
pub mod mapper;
pub mod pipeline;
pub mod replay;
pub mod scan_window;
pub mod traits;
pub mod types;
