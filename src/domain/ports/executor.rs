use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::domain::errors::ExecutorError;

/// Port for the shared task pool both the cache and the feeder run on.
///
/// Implementations only need to drive the task to completion; priorities and
/// cancellation are not part of the contract.
pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Submit `task` to `executor` and get a handle resolving to its output.
pub fn submit<T, F>(executor: &dyn TaskExecutor, task: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    executor.spawn(
        async move {
            // The receiver may have been dropped; the result is simply discarded.
            let _ = tx.send(task.await);
        }
        .boxed(),
    );
    TaskHandle { rx }
}

/// Future returned by [`submit`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, ExecutorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ExecutorError::TaskDropped))
    }
}
