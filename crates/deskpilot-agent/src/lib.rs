//! The chat orchestrator: binds a response source to an execution back end
//! and folds both producers' chunks into one ordered conversation log.
//!
//! [`ChatEngine`] owns the log, the responding flag, and the cursor, and
//! serves three invocation modes over the same cycle: blocking (drain and
//! return the appended slice), streaming (hand the caller the live event
//! iterator), and background (run the blocking call on its own thread
//! behind a joinable, cancellable handle).

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use thiserror::Error;

use deskpilot_capture::{CommandCapture, ScreenshotProvider};
use deskpilot_core::{
    CancelToken, EngineConfig, ExecutionHost, IdleHost, Message, Result, Role,
};
use deskpilot_llm::ResponseSource;
use deskpilot_observe::Observer;
use deskpilot_store::ConversationStore;

mod cycle;
mod input;

pub use cycle::ChatCycle;
pub use input::ChatInput;

/// Poll interval for [`ChatEngine::wait`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Typed failures callers are expected to match on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Nothing to do: no message and no event-stream consumer. Use
    /// `chat(Some(..))` or `chat_stream(None)` to continue a transcript.
    #[error("chat() needs a message; use chat_stream() to continue without one")]
    InvalidInvocation,
}

#[derive(Debug, Clone, Copy)]
enum ChatMode {
    Blocking,
    Stream,
    Background,
}

impl ChatMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Stream => "stream",
            Self::Background => "background",
        }
    }
}

/// Conversation state shared between the engine, its cycles, and background
/// threads. Only the active cycle mutates the log and cursor.
pub(crate) struct EngineState {
    pub(crate) messages: Mutex<Vec<Message>>,
    pub(crate) responding: AtomicBool,
    /// Index where "new" messages for the current call begin; advances only
    /// at the start of a one-off call.
    pub(crate) cursor: AtomicUsize,
    /// Snapshot filename, derived once per conversation and then reused.
    pub(crate) snapshot_name: Mutex<Option<String>>,
    pub(crate) active_cancel: Mutex<Option<CancelToken>>,
}

/// Clears the responding flag on every exit path: success, cancellation,
/// error, or the caller dropping a half-drained stream.
pub(crate) struct RespondingGuard {
    state: Arc<EngineState>,
}

impl RespondingGuard {
    fn engage(state: Arc<EngineState>) -> Self {
        state.responding.store(true, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for RespondingGuard {
    fn drop(&mut self) {
        self.state.responding.store(false, Ordering::SeqCst);
        if let Ok(mut active) = self.state.active_cancel.lock() {
            *active = None;
        }
    }
}

#[derive(Clone)]
pub struct ChatEngine {
    state: Arc<EngineState>,
    source: Arc<dyn ResponseSource>,
    host: Arc<dyn ExecutionHost>,
    capture: Option<Arc<dyn ScreenshotProvider>>,
    store: Option<Arc<ConversationStore>>,
    observer: Arc<Observer>,
    cfg: EngineConfig,
}

impl ChatEngine {
    /// Engine over the workspace's persisted settings (written on first use).
    pub fn new(workspace: &Path, source: Arc<dyn ResponseSource>) -> Result<Self> {
        let cfg = EngineConfig::ensure(workspace)?;
        Self::with_config(workspace, cfg, source)
    }

    pub fn with_config(
        workspace: &Path,
        cfg: EngineConfig,
        source: Arc<dyn ResponseSource>,
    ) -> Result<Self> {
        let mut observer = Observer::new(workspace, &cfg.telemetry)?;
        observer.set_verbose(cfg.verbose);

        let store = cfg
            .conversation
            .history
            .then(|| Arc::new(ConversationStore::new(cfg.conversation.resolved_dir(workspace))));

        let capture: Option<Arc<dyn ScreenshotProvider>> =
            (cfg.capture.enabled && !cfg.capture.command.is_empty()).then(|| {
                Arc::new(CommandCapture::new(
                    cfg.capture.resolved_dir(workspace),
                    cfg.capture.command.clone(),
                )) as Arc<dyn ScreenshotProvider>
            });

        let state = Arc::new(EngineState {
            messages: Mutex::new(Vec::new()),
            responding: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
            snapshot_name: Mutex::new(cfg.conversation.filename.clone()),
            active_cancel: Mutex::new(None),
        });

        Ok(Self {
            state,
            source,
            host: Arc::new(IdleHost::default()),
            capture,
            store,
            observer: Arc::new(observer),
            cfg,
        })
    }

    pub fn set_execution_host(&mut self, host: Arc<dyn ExecutionHost>) {
        self.host = host;
    }

    pub fn set_screenshot_provider(&mut self, capture: Option<Arc<dyn ScreenshotProvider>>) {
        self.capture = capture;
    }

    pub fn set_store(&mut self, store: Option<ConversationStore>) {
        self.store = store.map(Arc::new);
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Blocking mode: drains the cycle internally and returns the log slice
    /// appended since the call began (the caller's own input excluded).
    ///
    /// `None` is an [`EngineError::InvalidInvocation`]: a drained call with
    /// no input has no consumer and nothing to do.
    pub fn chat(&self, input: Option<ChatInput>) -> Result<Vec<Message>> {
        let input = input.ok_or(EngineError::InvalidInvocation)?;
        self.run_blocking(Some(input), CancelToken::new(), ChatMode::Blocking)
    }

    /// Streaming mode: returns the live event iterator. The responding flag
    /// is held until the cycle is drained or dropped. Passing `None`
    /// continues the cycle over the log as it stands.
    pub fn chat_stream(&self, input: Option<ChatInput>) -> Result<ChatCycle> {
        self.start_cycle(input, CancelToken::new(), ChatMode::Stream)
    }

    /// Background mode: runs the equivalent blocking call on its own thread
    /// and returns immediately. Callers either join the handle or poll via
    /// [`ChatEngine::wait`].
    pub fn chat_background(&self, input: ChatInput) -> ChatHandle {
        // Raise the flag before the thread is scheduled, so a wait() racing
        // the spawn still blocks until the cycle finishes.
        self.state.responding.store(true, Ordering::SeqCst);
        let engine = self.clone();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let join = thread::spawn(move || {
            engine.run_blocking(Some(input), token, ChatMode::Background)
        });
        ChatHandle { join, cancel }
    }

    /// Blocks until the responding flag clears, then returns the slice
    /// appended since the cursor recorded when the cycle began. Cooperative
    /// polling only; early exit goes through the cycle's cancel token.
    pub fn wait(&self) -> Vec<Message> {
        while self.state.responding.load(Ordering::SeqCst) {
            thread::sleep(WAIT_POLL_INTERVAL);
        }
        self.appended()
    }

    /// Trips the active cycle's cancel token, if a cycle is running.
    /// Effective at the next chunk boundary, never mid-chunk.
    pub fn cancel(&self) {
        if let Ok(active) = self.state.active_cancel.lock()
            && let Some(token) = active.as_ref()
        {
            token.cancel();
        }
    }

    #[must_use]
    pub fn is_responding(&self) -> bool {
        self.state.responding.load(Ordering::SeqCst)
    }

    /// Snapshot of the full conversation log.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        match self.state.messages.lock() {
            Ok(log) => log.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Terminates live execution sessions, clears the imported-capability
    /// flag, and wipes the in-memory log and cursor. Safe at any time, but
    /// callers must not race it against an in-flight cycle.
    pub fn reset(&self) {
        self.host.terminate();
        self.host.clear_api_imported();
        if let Ok(mut log) = self.state.messages.lock() {
            log.clear();
        }
        self.state.cursor.store(0, Ordering::SeqCst);
    }

    /// Whether a model reply contains one of the configured termination
    /// phrases for task-loop front-ends.
    #[must_use]
    pub fn loop_should_break(&self, reply: &str) -> bool {
        self.cfg
            .task_loop
            .breakers
            .iter()
            .any(|phrase| reply.contains(phrase))
    }

    fn run_blocking(
        &self,
        input: Option<ChatInput>,
        cancel: CancelToken,
        mode: ChatMode,
    ) -> Result<Vec<Message>> {
        let mut cycle = self.start_cycle(input, cancel, mode)?;
        while let Some(event) = cycle.next() {
            event?;
        }
        Ok(self.appended())
    }

    fn start_cycle(
        &self,
        input: Option<ChatInput>,
        cancel: CancelToken,
        mode: ChatMode,
    ) -> Result<ChatCycle> {
        let guard = RespondingGuard::engage(self.state.clone());
        let input_kind = input.as_ref().map_or("none", ChatInput::kind_label);
        let telemetry = self.cfg.anonymous_telemetry();
        if telemetry {
            self.observer
                .started_chat(mode.as_str(), input_kind, self.cfg.auto_run);
        }

        let one_off = input.is_some();
        if let Some(input) = input {
            self.ingest(input)?;
        }
        if let Ok(mut active) = self.state.active_cancel.lock() {
            *active = Some(cancel.clone());
        }

        let transcript = self
            .state
            .messages
            .lock()
            .map_err(|_| anyhow!("conversation log mutex poisoned"))?
            .clone();
        let chunks = match self.source.respond(&transcript, &cancel) {
            Ok(chunks) => chunks,
            Err(err) => {
                if telemetry {
                    self.observer
                        .errored(&err.to_string(), input_kind, self.cfg.auto_run);
                }
                return Err(err);
            }
        };

        Ok(ChatCycle::start(
            self.state.clone(),
            self.observer.clone(),
            self.store.clone(),
            self.capture.clone(),
            self.host.clone(),
            self.cfg.clone(),
            chunks,
            cancel,
            one_off,
            telemetry,
            input_kind,
            guard,
        ))
    }

    /// Normalizes caller input into the log and advances the cursor so the
    /// call only reports what the cycle itself appends.
    fn ingest(&self, input: ChatInput) -> Result<()> {
        let mut log = self
            .state
            .messages
            .lock()
            .map_err(|_| anyhow!("conversation log mutex poisoned"))?;
        match input {
            ChatInput::Text(content) => log.push(Message::Text {
                role: Role::User,
                content,
            }),
            ChatInput::Message(message) => log.push(message),
            ChatInput::Transcript(messages) => *log = messages,
        }
        self.state.cursor.store(log.len(), Ordering::SeqCst);
        Ok(())
    }

    fn appended(&self) -> Vec<Message> {
        let Ok(log) = self.state.messages.lock() else {
            return Vec::new();
        };
        let cursor = self.state.cursor.load(Ordering::SeqCst).min(log.len());
        log[cursor..].to_vec()
    }
}

/// Joinable, cancellable handle to a background chat cycle.
pub struct ChatHandle {
    join: JoinHandle<Result<Vec<Message>>>,
    cancel: CancelToken,
}

impl ChatHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the cycle and returns the appended slice, like the
    /// blocking call would have.
    pub fn join(self) -> Result<Vec<Message>> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("background chat thread panicked")),
        }
    }
}
