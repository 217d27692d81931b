use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// Open/closed flag plus the last failure seen on a connection. Shared between the
/// owner of the connection and whoever reports on it.
#[derive(Debug, Default)]
pub struct ConnectionState {
    open: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ConnectionState {
    pub fn opened() -> Self {
        let state = Self::default();
        state.mark_open();
        state
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn mark_open(&self) {
        self.open.store(true, Ordering::Release);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    /// Returns true only for the call that moved the state from open to closed.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    pub fn mark_failed(&self, error: impl ToString) {
        self.open.store(false, Ordering::Release);
        self.record_error(error);
    }

    /// Remembers a failure without changing the open flag.
    pub fn record_error(&self, error: impl ToString) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(error.to_string());
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }
}
