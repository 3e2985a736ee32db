use crate::api::ServerStatus;
use tokio::sync::watch;

/// RaftEventListener observes the local server's status as it changes.
///
/// Consuming this is subtle. It doesn't queue intermediate statuses. If the status changes several
/// times between two calls to `next()`, the listener only sees the most recent one.
#[derive(Clone)]
pub struct RaftEventListener {
    receiver: watch::Receiver<ServerStatus>,
}

impl RaftEventListener {
    pub(crate) fn new(receiver: watch::Receiver<ServerStatus>) -> Self {
        RaftEventListener { receiver }
    }

    /// The status as of now, without waiting.
    pub fn current(&self) -> ServerStatus {
        self.receiver.borrow().clone()
    }

    /// Wait for the next status change. Returns `None` once the server that published it is
    /// dropped.
    pub async fn next(&mut self) -> Option<ServerStatus> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the status satisfies `predicate`, checking the current status first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ServerStatus>
    where
        F: FnMut(&ServerStatus) -> bool,
    {
        loop {
            {
                let status = self.receiver.borrow_and_update();
                if predicate(&status) {
                    return Some(status.clone());
                }
            }
            self.receiver.changed().await.ok()?;
        }
    }
}
