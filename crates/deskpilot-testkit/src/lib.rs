//! Shared fixtures for exercising the engine without a live model or
//! execution back end.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use deskpilot_agent::ChatEngine;
use deskpilot_core::{Chunk, EngineConfig, Message, Role};
use deskpilot_llm::ScriptedSource;

/// Config with every side channel off: no capture, no history, no telemetry.
#[must_use]
pub fn quiet_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.capture.enabled = false;
    cfg.conversation.history = false;
    cfg.telemetry.enabled = false;
    cfg
}

/// Engine over a scripted source, one inner `Vec<Chunk>` per chat turn.
pub fn scripted_engine(workspace: &Path, turns: Vec<Vec<Chunk>>) -> Result<ChatEngine> {
    ChatEngine::with_config(workspace, quiet_config(), Arc::new(ScriptedSource::new(turns)))
}

/// A representative model turn: narration, an action, its output.
#[must_use]
pub fn sample_turn() -> Vec<Chunk> {
    vec![
        Chunk::text(Role::Assistant, "Running it now."),
        Chunk::code(Role::Assistant, "python", "print(2 + 2)"),
        Chunk::active_line(1),
        Chunk::console_output("4"),
        Chunk::run_complete(),
    ]
}

/// End-to-end smoke pass over a throwaway workspace.
pub fn run_smoke(workspace: &Path) -> Result<Vec<Message>> {
    let engine = scripted_engine(workspace, vec![sample_turn()])?;
    engine.chat(Some("smoke test".into()))
}
