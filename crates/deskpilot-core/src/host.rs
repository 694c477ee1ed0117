use std::sync::atomic::{AtomicBool, Ordering};

/// Contract with the code-execution back end.
///
/// The engine only needs three things from it: tearing down live sessions,
/// and reading/clearing the capability-API import flag. Session management
/// and language runtimes stay on the other side of this trait.
pub trait ExecutionHost: Send + Sync {
    /// Ends every live execution session. Idempotent.
    fn terminate(&self);

    /// Whether the capability API has been imported into live sessions.
    /// Surfaces richer console rendering (scrollback-aware truncation).
    fn api_imported(&self) -> bool;

    fn clear_api_imported(&self);
}

/// Host with no live sessions; the default until a real back end is wired in.
#[derive(Debug, Default)]
pub struct IdleHost {
    imported: AtomicBool,
}

impl IdleHost {
    pub fn set_api_imported(&self, imported: bool) {
        self.imported.store(imported, Ordering::SeqCst);
    }
}

impl ExecutionHost for IdleHost {
    fn terminate(&self) {}

    fn api_imported(&self) -> bool {
        self.imported.load(Ordering::SeqCst)
    }

    fn clear_api_imported(&self) {
        self.imported.store(false, Ordering::SeqCst);
    }
}
