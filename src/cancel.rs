use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag an editor can flip from another thread to stop a long scan.
///
/// The tokenizer checks it before each match attempt and returns
/// [`Error::Cancelled`](crate::Error::Cancelled) once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every scan holding a clone of this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
