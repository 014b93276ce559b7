//! arc-core: Shared protocol library for the ARC Connect gateway.
//!
//! Provides the JSON terminal frames exchanged over the WebSocket, the
//! gateway error taxonomy, the metrics data model, and incremental UTF-8
//! decoding for shell output.

pub mod error;
pub mod frames;
pub mod metrics;
pub mod text;

// Re-export commonly used items at crate root.
pub use error::{ErrorCode, GatewayError, GatewayResult};
pub use frames::{AuthFrame, ClientFrame, OutputMode, ServerFrame, DEFAULT_SSH_PORT};
pub use metrics::{MetricsSnapshot, SystemInfo};
pub use text::Utf8Decoder;
