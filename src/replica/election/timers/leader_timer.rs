use crate::actor;
use crate::replica::election::timers::signals::{self, SharedOption, StopCheck, Stopper};
use crate::replica::election::timers::time::{Clock, RealClock};
use crate::replica::{LeaderTimerTick, MemberId, Term};
use tokio::time::{Duration, Instant};

/// Held by the leader, one per peer. The task ticks right after it starts, then again whenever a
/// full heartbeat interval passes without a reset. Dropping the handle stops the task.
pub(crate) struct LeaderTimerHandle<C: Clock = RealClock> {
    next_tick: SharedOption<Instant>,
    heartbeat_interval: Duration,
    clock: C,
    _to_drop: Stopper,
}

struct LeaderTimerTask<C: Clock> {
    next_tick: SharedOption<Instant>,
    heartbeat_interval: Duration,
    actor_client: actor::WeakActorClient,
    tick: LeaderTimerTick,
    clock: C,
    stop_check: StopCheck,
}

impl LeaderTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_interval: Duration,
        actor_client: actor::WeakActorClient,
        peer_id: MemberId,
        term: Term,
    ) -> Self {
        let (task, handle) = LeaderTimerTask::new(heartbeat_interval, actor_client, peer_id, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> LeaderTimerHandle<C> {
    /// Called whenever the leader sends this peer an AppendEntries, so the next heartbeat is only
    /// due one interval after it.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.next_tick.replace(self.clock.now() + self.heartbeat_interval);
    }
}

impl<C: Clock> LeaderTimerTask<C> {
    fn new(
        heartbeat_interval: Duration,
        actor_client: actor::WeakActorClient,
        peer_id: MemberId,
        term: Term,
        clock: C,
    ) -> (Self, LeaderTimerHandle<C>) {
        // Starts out empty, so a new leader reaches the peer without waiting an interval.
        let next_tick = SharedOption::new();
        let (stopper, stop_check) = signals::stop_signal();

        let task = LeaderTimerTask {
            next_tick: next_tick.clone(),
            heartbeat_interval,
            actor_client,
            tick: LeaderTimerTick { peer_id, term },
            clock: clock.clone(),
            stop_check,
        };
        let handle = LeaderTimerHandle {
            next_tick,
            heartbeat_interval,
            clock,
            _to_drop: stopper,
        };

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            if let Some(deadline) = self.next_tick.take() {
                // Sleep, then look again. A reset while we slept pushed the deadline out.
                self.clock.sleep_until(deadline).await;
                continue;
            }

            // Leadership for this term is over.
            if self.stop_check.should_stop() {
                return;
            }
            if self.actor_client.leader_timer(self.tick.clone()).await.is_err() {
                return;
            }
            self.next_tick.replace(self.clock.now() + self.heartbeat_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::test_utils::TestUtilActor;
    use crate::replica::election::timers::time;

    fn expected_tick() -> LeaderTimerTick {
        LeaderTimerTick {
            peer_id: MemberId::new("b"),
            term: Term::new(4),
        }
    }

    #[tokio::test]
    async fn ticks_immediately_then_once_per_interval() {
        // -- setup --
        let interval = Duration::from_millis(100);
        let (client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = time::mocked_clock();
        let (task, _handle) = LeaderTimerTask::new(interval, client.weak(), MemberId::new("b"), Term::new(4), clock);
        tokio::spawn(task.run());

        // -- execute & verify --
        actor.expect_leader_tick(expected_tick()).await;
        actor.expect_quiet().await;

        for _ in 0..3 {
            controller.advance(interval / 2);
            actor.expect_quiet().await;
            controller.advance(interval / 2);
            actor.expect_leader_tick(expected_tick()).await;
        }

        // A long stall yields one tick, not a burst.
        controller.advance(interval * 4);
        actor.expect_leader_tick(expected_tick()).await;
        actor.expect_quiet().await;
    }

    #[tokio::test]
    async fn reset_postpones_the_next_tick() {
        // -- setup --
        let interval = Duration::from_millis(100);
        let (client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = time::mocked_clock();
        let (task, handle) = LeaderTimerTask::new(interval, client.weak(), MemberId::new("b"), Term::new(4), clock);
        tokio::spawn(task.run());
        actor.expect_leader_tick(expected_tick()).await;

        // -- execute --
        // Replication traffic at T=0.6, 1.2 and 1.8 keeps the heartbeat away.
        for _ in 0..3 {
            controller.advance(interval * 6 / 10);
            handle.reset_heartbeat_timer();
        }
        actor.expect_quiet().await;

        // -- verify --
        // Due at T=2.8.
        controller.advance(interval * 9 / 10);
        actor.expect_quiet().await;
        controller.advance(interval / 10);
        actor.expect_leader_tick(expected_tick()).await;
        assert_eq!(controller.elapsed_time(), interval * 28 / 10);
    }

    #[tokio::test]
    async fn dropping_handle_stops_task() {
        // -- setup --
        let interval = Duration::from_millis(100);
        let (client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = time::mocked_clock();
        let (task, handle) = LeaderTimerTask::new(interval, client.weak(), MemberId::new("b"), Term::new(4), clock);
        let join_handle = tokio::spawn(task.run());
        actor.expect_leader_tick(expected_tick()).await;

        // -- execute --
        drop(handle);
        controller.advance(interval);

        // -- verify --
        join_handle.await.unwrap();
        actor.expect_quiet().await;
    }

    #[tokio::test]
    async fn task_exits_once_actor_is_gone() {
        let (client, rx) = ActorClient::new(10);
        let weak = client.weak();
        drop(rx);
        drop(client);
        let (clock, _controller) = time::mocked_clock();
        let (task, _handle) = LeaderTimerTask::new(Duration::from_millis(100), weak, MemberId::new("b"), Term::new(4), clock);

        task.run().await;
    }
}
