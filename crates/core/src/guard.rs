//! Echo suppression for remotely applied updates.
//!
//! While an inbound update is being applied to an entity, observers of that
//! entity must not publish the change back out. The router holds an
//! [`EchoGuardToken`] for the duration of the apply; local `set_value` calls
//! that arrive meanwhile are suppressed rather than published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-entity flag shared by the entity and all of its parameters.
#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    held: Arc<AtomicBool>,
}

impl EchoGuard {
    /// Fresh, released guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if a remote apply is already in progress.
    pub fn try_acquire(&self) -> Option<EchoGuardToken> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EchoGuardToken {
                held: Arc::clone(&self.held),
            })
    }

    /// Whether a remote apply currently holds the guard.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the guard when dropped, including on early return.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct EchoGuardToken {
    held: Arc<AtomicBool>,
}

impl Drop for EchoGuardToken {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
