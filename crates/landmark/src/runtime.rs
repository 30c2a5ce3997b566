//! Background task plumbing between worker tasks and the frame thread.
//!
//! Work is spawned through a [`TaskSpawner`]; results come back through a
//! [`LatestSlot`] that the frame thread polls at the top of each frame.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{runtime::Handle, task::JoinSet};

/// Spawns background tasks on a Tokio runtime and cancels them wholesale.
///
/// Every cancellation bumps a generation counter. Tasks capture the
/// generation they were spawned in, and consumers drop results whose
/// generation is no longer current.
#[derive(Clone)]
pub struct TaskSpawner {
    inner: Arc<SpawnerInner>,
}

struct SpawnerInner {
    handle: Handle,
    tasks: Mutex<JoinSet<()>>,
    generation: AtomicU64,
}

impl TaskSpawner {
    /// Create a spawner for the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(SpawnerInner {
                handle,
                tasks: Mutex::new(JoinSet::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Create a spawner for the runtime the caller is running in, if any.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Spawn a background task that runs to completion.
    ///
    /// For tasks that need to return values, publish them into a
    /// [`LatestSlot`].
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(future, &self.inner.handle);
    }

    /// The current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Abort every outstanding task and start a new generation.
    ///
    /// Returns the new generation.
    pub fn cancel_all(&self) -> u64 {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let aborted = tasks.len();
        tasks.abort_all();
        // Aborted tasks still need to be reaped; they finish on the runtime.
        while tasks.try_join_next().is_some() {}
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!("Cancelled {aborted} background tasks, generation {generation}");
        generation
    }

    /// Number of tasks that have not been reaped yet.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for TaskSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpawner")
            .field("generation", &self.generation())
            .field("pending_tasks", &self.pending_tasks())
            .finish_non_exhaustive()
    }
}

/// A single-slot channel where the newest value replaces any unread one.
///
/// This is lossy: if two results are published between polls only the
/// second survives.
#[derive(Debug)]
pub struct LatestSlot<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
}

impl<T> LatestSlot<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    /// Store a value, replacing any unread one.
    ///
    /// Returns `true` if an unread value was overwritten.
    pub fn publish(&self, value: T) -> bool {
        matches!(self.tx.force_send(value), Ok(Some(_)))
    }

    /// Take the stored value, if any.
    #[must_use]
    pub fn take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drop any unread value.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Whether a value is waiting to be taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}
