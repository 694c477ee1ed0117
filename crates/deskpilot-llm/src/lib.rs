//! Response-source contract: where chunks come from.
//!
//! The engine never talks to a model API directly; it pulls an ordered,
//! finite chunk stream from a [`ResponseSource`] and leaves transport,
//! prompting, and wire formats on the far side of the trait. This crate
//! ships the contract plus two concrete sources: a scripted one for tests
//! and front-end development, and a replay source that feeds recorded
//! chunks back through the engine.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use deskpilot_core::{CancelToken, Chunk, Message, Result};

/// Lazy, finite chunk sequence for one chat cycle.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Chunk>> + Send>;

/// Produces the model/execution chunk stream for the current transcript.
///
/// The cancel token is the caller's early-exit channel: implementations
/// should stop producing once it trips, and the aggregator additionally
/// checks it at every chunk boundary.
pub trait ResponseSource: Send + Sync {
    fn respond(&self, transcript: &[Message], cancel: &CancelToken) -> Result<ChunkStream>;
}

/// Scripted source: each `respond` call plays the next pre-recorded turn.
/// Errors once the script runs dry, which keeps a runaway loop visible in
/// tests instead of silently replaying nothing.
pub struct ScriptedSource {
    turns: Mutex<VecDeque<Vec<Chunk>>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(turns: Vec<Vec<Chunk>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// Single-turn script.
    #[must_use]
    pub fn single(chunks: Vec<Chunk>) -> Self {
        Self::new(vec![chunks])
    }
}

impl ResponseSource for ScriptedSource {
    fn respond(&self, _transcript: &[Message], cancel: &CancelToken) -> Result<ChunkStream> {
        let turn = self
            .turns
            .lock()
            .map_err(|_| anyhow!("scripted source mutex poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted source exhausted"))?;
        let cancel = cancel.clone();
        Ok(Box::new(
            turn.into_iter()
                .take_while(move |_| !cancel.is_cancelled())
                .map(Ok),
        ))
    }
}

/// Replays a JSONL chunk recording (one chunk object per line).
pub struct ReplaySource {
    path: PathBuf,
}

impl ReplaySource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResponseSource for ReplaySource {
    fn respond(&self, _transcript: &[Message], cancel: &CancelToken) -> Result<ChunkStream> {
        let file = File::open(&self.path)
            .with_context(|| format!("opening chunk recording {}", self.path.display()))?;
        let cancel = cancel.clone();
        let lines = BufReader::new(file)
            .lines()
            .take_while(move |_| !cancel.is_cancelled())
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| {
                let line = line.context("reading chunk recording")?;
                serde_json::from_str::<Chunk>(&line).context("malformed chunk record")
            });
        Ok(Box::new(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_core::Role;
    use std::io::Write;

    #[test]
    fn scripted_source_plays_turns_in_order_then_errors() {
        let source = ScriptedSource::new(vec![
            vec![Chunk::text(Role::Assistant, "one")],
            vec![Chunk::text(Role::Assistant, "two")],
        ]);
        let cancel = CancelToken::new();

        let first: Vec<Chunk> = source
            .respond(&[], &cancel)
            .expect("first turn")
            .collect::<Result<_>>()
            .expect("chunks");
        assert_eq!(first, vec![Chunk::text(Role::Assistant, "one")]);

        let second: Vec<Chunk> = source
            .respond(&[], &cancel)
            .expect("second turn")
            .collect::<Result<_>>()
            .expect("chunks");
        assert_eq!(second, vec![Chunk::text(Role::Assistant, "two")]);

        assert!(source.respond(&[], &cancel).is_err());
    }

    #[test]
    fn scripted_source_stops_at_cancellation() {
        let source = ScriptedSource::single(vec![
            Chunk::text(Role::Assistant, "a"),
            Chunk::text(Role::Assistant, "b"),
        ]);
        let cancel = CancelToken::new();
        let mut stream = source.respond(&[], &cancel).expect("stream");
        assert!(stream.next().is_some());
        cancel.cancel();
        assert!(stream.next().is_none());
    }

    #[test]
    fn replay_source_reads_jsonl_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");
        let mut file = File::create(&path).expect("create");
        writeln!(
            file,
            r#"{{"role":"assistant","type":"message","content":"hi"}}"#
        )
        .expect("write");
        writeln!(file).expect("write blank");
        writeln!(
            file,
            r#"{{"role":"assistant","type":"code","format":"python","content":"1+1"}}"#
        )
        .expect("write");

        let source = ReplaySource::new(&path);
        let chunks: Vec<Chunk> = source
            .respond(&[], &CancelToken::new())
            .expect("stream")
            .collect::<Result<_>>()
            .expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Chunk::text(Role::Assistant, "hi"));
        assert_eq!(chunks[1], Chunk::code(Role::Assistant, "python", "1+1"));
    }

    #[test]
    fn replay_source_surfaces_malformed_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "not json\n").expect("write");
        let source = ReplaySource::new(&path);
        let mut stream = source.respond(&[], &CancelToken::new()).expect("stream");
        assert!(stream.next().expect("item").is_err());
    }
}
