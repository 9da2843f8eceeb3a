use crate::Result;
use futures::future::BoxFuture;

pub type AsyncBody<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send + 'static>;
pub type SyncBody<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

/// How a command produces its value.
pub enum ExecKind<T> {
    /// Yields a future; runs on the async runtime.
    Async(AsyncBody<T>),
    /// A blocking thunk; runs on a worker so it cannot stall the executor.
    Sync(SyncBody<T>),
}

/// What to do when the primary path fails (user error, timeout or an open
/// breaker).
pub enum Fallback<T> {
    /// Surface the primary failure.
    None,
    /// Materialize a replacement value. A failing thunk surfaces its own
    /// error; it is never retried.
    Static(SyncBody<T>),
    /// Run another command under the same key's admission rules. Chains are
    /// finite by construction: a command owns its fallback outright, so a
    /// cycle cannot be expressed.
    Cmd(Box<Command<T>>),
}

/// A unit of work protected by a command key.
///
/// ```rust
/// use defender_core::command::Command;
///
/// let cmd = Command::new_async(|| Box::pin(async { Ok(42) }))
///     .with_static_fallback(|| Ok(0));
/// ```
pub struct Command<T> {
    pub(crate) exec: ExecKind<T>,
    pub(crate) fallback: Fallback<T>,
}

impl<T> Command<T> {
    pub fn new_async(
        body: impl FnOnce() -> BoxFuture<'static, Result<T>> + Send + 'static,
    ) -> Self {
        Command {
            exec: ExecKind::Async(Box::new(body)),
            fallback: Fallback::None,
        }
    }

    pub fn new_sync(body: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        Command {
            exec: ExecKind::Sync(Box::new(body)),
            fallback: Fallback::None,
        }
    }

    /// Replace a failed outcome with a literal value.
    pub fn with_static_fallback(
        mut self,
        value: impl FnOnce() -> Result<T> + Send + 'static,
    ) -> Self {
        self.fallback = Fallback::Static(Box::new(value));
        self
    }

    /// Replace a failed outcome with the result of another command,
    /// executed through the same key.
    pub fn with_cmd_fallback(mut self, fallback: Command<T>) -> Self {
        self.fallback = Fallback::Cmd(Box::new(fallback));
        self
    }

    pub fn is_sync(&self) -> bool {
        matches!(self.exec, ExecKind::Sync(_))
    }

    pub fn has_fallback(&self) -> bool {
        !matches!(self.fallback, Fallback::None)
    }
}
