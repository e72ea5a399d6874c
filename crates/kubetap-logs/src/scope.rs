use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

thread_local! {
    /// Gates whose callbacks are running on this thread
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Shared cancellation for a group of readers.
///
/// Besides waking readers through the token, the scope gates callback
/// delivery: once `cancel` returns, no callback passed through `deliver`
/// can start, and any that was running on another thread has finished.
/// Cancelling from inside a delivered callback returns immediately.
#[derive(Clone, Debug)]
pub struct CancelScope {
    token: CancellationToken,
    open: Arc<AtomicBool>,
    gate: Arc<RwLock<()>>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            open: Arc::new(AtomicBool::new(true)),
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Cancel every reader in the scope. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
        self.open.store(false, Ordering::SeqCst);
        if !self.delivering_here() {
            // waits out callbacks in flight on other threads
            drop(self.gate.write());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `f` unless the scope is cancelled. Returns whether it ran.
    pub(crate) fn deliver<F: FnOnce()>(&self, f: F) -> bool {
        let _guard = self.gate.read_recursive();
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }

        let id = self.id();
        DELIVERING.with(|d| d.borrow_mut().push(id));
        let _pop = PopOnDrop(id);
        f();
        true
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.gate) as usize
    }

    fn delivering_here(&self) -> bool {
        let id = self.id();
        DELIVERING.with(|d| d.borrow().contains(&id))
    }
}

/// Unregisters a delivery even if the callback panics
struct PopOnDrop(usize);

impl Drop for PopOnDrop {
    fn drop(&mut self) {
        DELIVERING.with(|d| {
            let mut d = d.borrow_mut();
            if let Some(pos) = d.iter().rposition(|id| *id == self.0) {
                d.remove(pos);
            }
        });
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_until_cancelled() {
        let scope = CancelScope::new();
        let mut calls = 0;
        assert!(scope.deliver(|| calls += 1));
        scope.cancel();
        scope.cancel();
        assert!(!scope.deliver(|| calls += 1));
        assert_eq!(calls, 1);
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let scope = CancelScope::new();
        let other = scope.clone();
        other.cancel();
        assert!(scope.is_cancelled());
        assert!(!scope.deliver(|| {}));
    }

    #[test]
    fn test_cancel_from_inside_callback() {
        let scope = CancelScope::new();
        let inner = scope.clone();
        assert!(scope.deliver(|| inner.cancel()));
        assert!(scope.is_cancelled());
        assert!(!scope.deliver(|| {}));
        assert!(!scope.delivering_here());
    }
}
