use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub(crate) fn shutdown_signal() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (ShutdownHandle { _tx: tx }, ShutdownSignal { rx })
}

/// Dropping the handle resolves the paired `ShutdownSignal`.
pub(crate) struct ShutdownHandle {
    _tx: oneshot::Sender<()>,
}

pub struct ShutdownSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = Pin::new(&mut self.rx);

        match rx.poll(cx) {
            Poll::Pending => Poll::Pending,
            // We don't care if oneshot Sender sent value or dropped
            Poll::Ready(_) => Poll::Ready(()),
        }
    }
}

/// ListenerHandle keeps an inbound listener alive. Dropping it stops the listener in the
/// background; `shutdown()` also waits for the listener task to finish.
pub struct ListenerHandle {
    shutdown: ShutdownHandle,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Build a handle for a listener task. The task must exit once `signal` resolves.
    pub fn spawn<F, Fut>(listener: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, signal) = shutdown_signal();
        let task = tokio::spawn(listener(signal));

        ListenerHandle {
            shutdown,
            task: Some(task),
        }
    }

    pub async fn shutdown(mut self) {
        let task = self.task.take();
        drop(self);

        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn shutdown_resolves_signal_and_waits_for_task() {
        let exited = Arc::new(AtomicBool::new(false));
        let exited_clone = exited.clone();

        let handle = ListenerHandle::spawn(move |signal| async move {
            signal.await;
            exited_clone.store(true, Ordering::SeqCst);
        });

        handle.shutdown().await;
        assert!(exited.load(Ordering::SeqCst));
    }
}
