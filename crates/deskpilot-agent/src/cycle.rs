use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};

use anyhow::anyhow;
use chrono::Local;

use deskpilot_capture::ScreenshotProvider;
use deskpilot_core::{
    Boundary, CancelToken, Chunk, ChunkClass, ChunkKind, EngineConfig, ExecutionHost, Message,
    Result, Role, StreamEvent, truncate_output,
};
use deskpilot_llm::ChunkStream;
use deskpilot_observe::Observer;
use deskpilot_store::ConversationStore;

use crate::{EngineState, RespondingGuard};

/// One live chat cycle: an iterator of stream events that mutates the
/// conversation log as a side effect, in exactly the order chunks arrive.
///
/// The state machine merges consecutive same-shaped chunks into logical
/// messages, emits start/end boundaries for renderers, injects a screenshot
/// ahead of every code message, keeps console output bounded, and forwards
/// confirmation requests. Dropping the cycle early releases the responding
/// flag and persists nothing.
pub struct ChatCycle {
    state: Arc<EngineState>,
    observer: Arc<Observer>,
    store: Option<Arc<ConversationStore>>,
    capture: Option<Arc<dyn ScreenshotProvider>>,
    host: Arc<dyn ExecutionHost>,
    cfg: EngineConfig,
    chunks: ChunkStream,
    cancel: CancelToken,
    /// Identity of the in-progress logical message, if any.
    open: Option<Boundary>,
    /// Events produced by the current chunk, drained before the next pull.
    queued: VecDeque<StreamEvent>,
    one_off: bool,
    telemetry: bool,
    input_kind: &'static str,
    finished: bool,
    cancelled: bool,
    failed: bool,
    _guard: RespondingGuard,
}

impl ChatCycle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        state: Arc<EngineState>,
        observer: Arc<Observer>,
        store: Option<Arc<ConversationStore>>,
        capture: Option<Arc<dyn ScreenshotProvider>>,
        host: Arc<dyn ExecutionHost>,
        cfg: EngineConfig,
        chunks: ChunkStream,
        cancel: CancelToken,
        one_off: bool,
        telemetry: bool,
        input_kind: &'static str,
        guard: RespondingGuard,
    ) -> Self {
        Self {
            state,
            observer,
            store,
            capture,
            host,
            cfg,
            chunks,
            cancel,
            open: None,
            queued: VecDeque::new(),
            one_off,
            telemetry,
            input_kind,
            finished: false,
            cancelled: false,
            failed: false,
            _guard: guard,
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished && self.queued.is_empty()
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, Vec<Message>>> {
        self.state
            .messages
            .lock()
            .map_err(|_| anyhow!("conversation log mutex poisoned"))
    }

    /// Folds one chunk into the log and queues the events it produces.
    fn absorb(&mut self, chunk: Chunk) -> Result<()> {
        // Empty chunks carry nothing to group; contentless chunks mean
        // nothing unless they are the run-complete marker.
        match &chunk.content {
            Some(text) if text.is_empty() => return Ok(()),
            None if !chunk.is_run_complete_marker() => return Ok(()),
            _ => {}
        }

        // A finished run must leave a result slot: if nothing from the
        // computer landed after the code message, add the empty placeholder.
        if chunk.is_run_complete_marker() {
            let mut log = self.lock_log()?;
            if log.last().map(Message::role) != Some(Role::Computer) {
                log.push(Message::empty_console_output());
            }
        }

        // Confirmations close the open boundary and go straight to the
        // caller for approval; in auto-run mode they are skipped silently.
        if chunk.kind == ChunkKind::Confirmation {
            if let Some(open) = self.open.take() {
                self.queued.push_back(StreamEvent::End(open));
            }
            if !self.cfg.auto_run {
                self.queued.push_back(StreamEvent::Confirmation(chunk));
            }
            return Ok(());
        }

        let class = chunk.classify();

        if self.open.as_ref().is_some_and(|open| open.accepts(&chunk)) {
            if class == ChunkClass::Persisted {
                let mut log = self.lock_log()?;
                // The boundary matched, but the last logged entry may still
                // differ (a formatless console boundary spans entries whose
                // formats disagree): append instead of concatenating
                // dissimilar content.
                if differs_from_last(log.last(), &chunk) {
                    let message = chunk.clone().into_message()?;
                    log.push(message);
                } else if let Some(last) = log.last_mut() {
                    last.push_content(chunk.content.as_deref().unwrap_or_default());
                }
            }
        } else {
            if let Some(open) = self.open.take() {
                self.queued.push_back(StreamEvent::End(open));
            }
            let boundary = Boundary::opening(&chunk);
            self.queued.push_back(StreamEvent::Start(boundary.clone()));
            self.open = Some(boundary);

            if class == ChunkClass::Persisted {
                if chunk.kind == ChunkKind::Code {
                    self.capture_before_code(chunk.role)?;
                }
                let message = chunk.clone().into_message()?;
                self.lock_log()?.push(message);
            }
        }

        // Every chunk is re-emitted after the mutations it caused, so
        // stream consumers see the full feed plus the synthetic events.
        let bound_console = chunk.kind == ChunkKind::Console
            && chunk.format.as_deref() == Some("output");
        self.queued.push_back(StreamEvent::Chunk(chunk));

        if bound_console {
            let mut log = self.lock_log()?;
            if let Some(last) = log.last_mut() {
                let bounded =
                    truncate_output(last.content(), self.cfg.max_output, self.host.api_imported());
                last.set_content(bounded);
            }
        }
        Ok(())
    }

    /// Records the visual state that motivated the upcoming action.
    /// Capture failure never aborts the cycle.
    fn capture_before_code(&mut self, role: Role) -> Result<()> {
        let Some(capture) = &self.capture else {
            return Ok(());
        };
        match capture.capture() {
            Ok(path) => {
                let image = Message::Image {
                    role,
                    format: "path".to_string(),
                    content: path.display().to_string(),
                };
                self.lock_log()?.push(image.clone());
                self.queued.push_back(StreamEvent::Screenshot(image));
            }
            Err(err) => {
                if self.cfg.debug {
                    self.observer
                        .warn_log(&format!("screen capture before code failed: {err}"));
                }
            }
        }
        Ok(())
    }

    fn conclude(&mut self) {
        self.finished = true;
        // The log is final from here on: waiters can be released while the
        // consumer drains any already-produced events.
        self.state.responding.store(false, Ordering::SeqCst);
        if self.failed {
            return;
        }
        self.persist();
    }

    /// Full-log snapshot for one-off calls. The filename is derived once
    /// per conversation and reused, so later saves overwrite.
    fn persist(&mut self) {
        if !self.one_off {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let log = match self.state.messages.lock() {
            Ok(log) => log.clone(),
            Err(_) => return,
        };
        if log.is_empty() {
            return;
        }
        let name = {
            let Ok(mut slot) = self.state.snapshot_name.lock() else {
                return;
            };
            slot.get_or_insert_with(|| {
                ConversationStore::derive_filename(log[0].content(), Local::now())
            })
            .clone()
        };
        if let Err(err) = store.save(&name, &log) {
            self.observer
                .warn_log(&format!("failed to persist conversation snapshot: {err}"));
        }
    }

    fn fail(&mut self, err: &anyhow::Error) {
        self.failed = true;
        self.finished = true;
        self.state.responding.store(false, Ordering::SeqCst);
        if self.telemetry {
            self.observer
                .errored(&err.to_string(), self.input_kind, self.cfg.auto_run);
        }
    }
}

impl Iterator for ChatCycle {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }
            // Checked once per chunk: cancellation lands at the next chunk
            // boundary with no further mutation or boundary events.
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                self.conclude();
                continue;
            }
            match self.chunks.next() {
                None => {
                    if let Some(open) = self.open.take() {
                        self.queued.push_back(StreamEvent::End(open));
                    }
                    self.conclude();
                }
                Some(Err(err)) => {
                    self.fail(&err);
                    return Some(Err(err));
                }
                Some(Ok(chunk)) => {
                    if let Err(err) = self.absorb(chunk) {
                        self.fail(&err);
                        return Some(Err(err));
                    }
                }
            }
        }
    }
}

/// Second merge gate: even inside a matching boundary, content only
/// concatenates onto the last entry when every field the entry carries
/// agrees with the chunk.
fn differs_from_last(last: Option<&Message>, chunk: &Chunk) -> bool {
    let Some(last) = last else {
        return true;
    };
    if last.role() != chunk.role || last.kind() != chunk.kind {
        return true;
    }
    match last.format() {
        Some(format) => chunk.format.as_deref() != Some(format),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shape_concatenates() {
        let last = Message::Console {
            role: Role::Computer,
            format: Some("output".to_string()),
            content: "a".to_string(),
        };
        assert!(!differs_from_last(
            Some(&last),
            &Chunk::console_output("b")
        ));
    }

    #[test]
    fn format_disagreement_appends() {
        let last = Message::Console {
            role: Role::Computer,
            format: Some("output".to_string()),
            content: "a".to_string(),
        };
        let formatless = Chunk {
            format: None,
            ..Chunk::console_output("b")
        };
        assert!(differs_from_last(Some(&last), &formatless));
    }

    #[test]
    fn formatless_entry_accepts_any_chunk_format() {
        let last = Message::Console {
            role: Role::Computer,
            format: None,
            content: "a".to_string(),
        };
        assert!(!differs_from_last(
            Some(&last),
            &Chunk::console_output("b")
        ));
    }

    #[test]
    fn role_or_kind_disagreement_appends() {
        let last = Message::Text {
            role: Role::Assistant,
            content: "a".to_string(),
        };
        assert!(differs_from_last(
            Some(&last),
            &Chunk::text(Role::User, "b")
        ));
        assert!(differs_from_last(
            Some(&last),
            &Chunk::code(Role::Assistant, "python", "b")
        ));
        assert!(differs_from_last(None, &Chunk::text(Role::User, "b")));
    }
}
