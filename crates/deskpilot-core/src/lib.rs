//! Shared data model and contracts for the deskpilot engine.
//!
//! Everything that crosses a crate boundary lives here: the conversation
//! message model, the transient chunk shape emitted by response sources,
//! boundary/stream events for live consumers, the execution-host contract,
//! cooperative cancellation, console-output truncation, and configuration.

use std::path::{Path, PathBuf};

mod cancel;
mod config;
mod host;
mod message;
mod stream;
mod truncate;

pub use cancel::CancelToken;
pub use config::{
    CaptureConfig, ConversationConfig, EngineConfig, LoopConfig, TelemetryConfig,
};
pub use host::{ExecutionHost, IdleHost};
pub use message::{ACTIVE_LINE, Chunk, ChunkClass, ChunkError, ChunkKind, Message, Role};
pub use stream::{Boundary, StreamEvent};
pub use truncate::truncate_output;

pub type Result<T> = anyhow::Result<T>;

/// Per-workspace runtime directory holding settings, logs, and snapshots.
pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".deskpilot")
}
