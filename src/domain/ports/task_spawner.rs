use futures::future::BoxFuture;

/// Spawns task executions off the caller's stack.
/// Abstracts the runtime (Tokio) so the task host can be driven from tests.
pub trait TaskSpawner: Send + Sync {
    /// Spawn a future that returns nothing
    fn spawn(&self, future: BoxFuture<'static, ()>);
}
