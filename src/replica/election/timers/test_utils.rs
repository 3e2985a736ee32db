use crate::actor::Event;
use crate::replica::LeaderTimerTick;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Stands in for the replica actor, so timer tests can look at what lands in its queue.
pub(super) struct TestUtilActor {
    queue: mpsc::Receiver<Event>,
}

impl TestUtilActor {
    pub(super) fn new(queue: mpsc::Receiver<Event>) -> Self {
        TestUtilActor { queue }
    }

    async fn next_event(&mut self) -> Event {
        timeout(Duration::from_secs(5), self.queue.recv())
            .await
            .expect("No event within 5s")
            .expect("Actor queue closed")
    }

    pub(super) async fn expect_leader_tick(&mut self, expected: LeaderTimerTick) {
        match self.next_event().await {
            Event::LeaderTimer(tick) => assert_eq!(tick, expected),
            other => panic!("Expected leader tick, got {:?}", other),
        }
    }

    pub(super) async fn expect_election_timeout(&mut self, timer_id: u64) {
        match self.next_event().await {
            Event::ElectionTimeout(tick) => assert_eq!(tick.timer_id, timer_id),
            other => panic!("Expected election timeout, got {:?}", other),
        }
    }

    /// Timer tasks run on real tasks, so give them a moment to act on a clock advance.
    pub(super) async fn expect_quiet(&mut self) {
        if let Ok(event) = timeout(Duration::from_millis(10), self.queue.recv()).await {
            panic!("Expected no event, got {:?}", event);
        }
    }
}
