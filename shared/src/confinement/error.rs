use std::thread::ThreadId;

use thiserror::Error;

/// Errors that can occur when touching a ConfinementQueue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfinementError {
    /// Drained from a thread other than the one that owns the queue
    #[error("ConfinementQueue owned by thread {owner:?} was drained from thread {current:?}. Only the owning thread may consume queued items")]
    WrongThread { owner: ThreadId, current: ThreadId },
}
