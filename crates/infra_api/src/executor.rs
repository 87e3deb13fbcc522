//! Hands work to whichever thread or runtime the host prefers.

/// A unit of work accepted by a [`TaskExecutor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on a host-chosen thread.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Runs every task on the tokio blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling task. Panics outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl TaskExecutor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}
