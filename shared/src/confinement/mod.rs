//! Hands work from arbitrary threads back to the one thread that owns a
//! piece of state.
//!
//! I/O completions post plain values through a cloneable [`Poster`]; the
//! owning thread drains them in FIFO order with [`ConfinementQueue::drain`].

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use log::trace;

mod error;
pub use error::ConfinementError;

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    activity: Condvar,
}

impl<T> Shared<T> {
    // A panic while holding the lock cannot leave the deque half-updated
    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, item: T) {
        self.items().push_back(item);
        self.activity.notify_all();
    }
}

/// Multi-producer queue consumed only by the thread that created it
pub struct ConfinementQueue<T> {
    shared: Arc<Shared<T>>,
    owner: ThreadId,
}

impl<T> ConfinementQueue<T> {
    /// Creates a queue owned by the calling thread
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                activity: Condvar::new(),
            }),
            owner: thread::current().id(),
        }
    }

    /// Returns a handle that can post into this queue from any thread
    pub fn poster(&self) -> Poster<T> {
        Poster {
            shared: self.shared.clone(),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Makes the calling thread the owner. Requires exclusive access, so the
    /// previous owner can no longer be draining.
    pub fn claim(&mut self) {
        self.owner = thread::current().id();
    }

    pub fn post(&self, item: T) {
        self.shared.push(item);
    }

    pub fn len(&self) -> usize {
        self.shared.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `handler` for every queued item in FIFO order, including items
    /// posted while the drain is running. Returns how many items were handled.
    pub fn drain<F: FnMut(T)>(&self, mut handler: F) -> Result<usize, ConfinementError> {
        self.check_owner()?;

        let mut handled = 0;
        loop {
            // the lock is released before the handler runs
            let next = self.shared.items().pop_front();
            match next {
                Some(item) => {
                    handler(item);
                    handled += 1;
                }
                None => {
                    if handled > 0 {
                        trace!("drained {} queued items", handled);
                    }
                    return Ok(handled);
                }
            }
        }
    }

    /// Blocks the owning thread until something is queued or `timeout`
    /// elapses. Returns whether the queue is non-empty.
    pub fn wait_for_activity(&self, timeout: Duration) -> Result<bool, ConfinementError> {
        self.check_owner()?;

        let deadline = Instant::now() + timeout;
        let mut items = self.shared.items();
        while items.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .shared
                .activity
                .wait_timeout(items, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            items = guard;
        }
        Ok(true)
    }

    fn check_owner(&self) -> Result<(), ConfinementError> {
        let current = thread::current().id();
        if current != self.owner {
            return Err(ConfinementError::WrongThread {
                owner: self.owner,
                current,
            });
        }
        Ok(())
    }
}

impl<T> Default for ConfinementQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable, thread-safe producer side of a ConfinementQueue
pub struct Poster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Poster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Poster<T> {
    pub fn post(&self, item: T) {
        self.shared.push(item);
    }
}

pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// A ConfinementQueue of closures. Posting from the owning thread runs the
/// action on the spot; posting from anywhere else defers it to the next
/// [`ActionQueue::run_pending`].
pub struct ActionQueue {
    queue: ConfinementQueue<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            queue: ConfinementQueue::new(),
        }
    }

    pub fn poster(&self) -> ActionPoster {
        ActionPoster {
            poster: self.queue.poster(),
            owner: self.queue.owner(),
        }
    }

    pub fn post<F: FnOnce() + Send + 'static>(&self, action: F) {
        if self.queue.is_owner_thread() {
            action();
        } else {
            self.queue.post(Box::new(action));
        }
    }

    /// Makes the calling thread the owner. Posters taken earlier still
    /// compare against the previous owner.
    pub fn claim(&mut self) {
        self.queue.claim();
    }

    /// Runs every deferred action on the owning thread
    pub fn run_pending(&self) -> Result<usize, ConfinementError> {
        self.queue.drain(|action| action())
    }

    pub fn wait_for_activity(&self, timeout: Duration) -> Result<bool, ConfinementError> {
        self.queue.wait_for_activity(timeout)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ActionPoster {
    poster: Poster<Action>,
    owner: ThreadId,
}

impl ActionPoster {
    pub fn post<F: FnOnce() + Send + 'static>(&self, action: F) {
        if thread::current().id() == self.owner {
            action();
        } else {
            self.poster.post(Box::new(action));
        }
    }
}
