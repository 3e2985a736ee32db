use crate::actor;
use crate::replica::election::timers::signals::{self, SharedOption, StopCheck, Stopper};
use crate::replica::election::timers::time::{Clock, RealClock};
use crate::replica::ElectionTimerTick;
use rand::distributions::{Distribution, Uniform};
use tokio::time::{Duration, Instant};

/// Held by followers and candidates. Every reset draws a fresh timeout from the jitter range.
/// Dropping the handle stops the task, which is how a role change cancels a pending election.
pub(crate) struct ElectionTimerHandle<C: Clock = RealClock> {
    deadline: SharedOption<Instant>,
    jitter: Uniform<Duration>,
    clock: C,
    _to_drop: Stopper,
}

struct ElectionTimerTask<C: Clock> {
    deadline: SharedOption<Instant>,
    actor_client: actor::WeakActorClient,
    tick: ElectionTimerTick,
    clock: C,
    stop_check: StopCheck,
    // Pause between repeated timeouts while the actor neither resets nor replaces this timer.
    retry_after: Duration,
}

impl ElectionTimerHandle {
    pub(crate) fn spawn_timer_task(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: actor::WeakActorClient,
        timer_id: u64,
    ) -> Self {
        let (task, handle) = ElectionTimerTask::new(min_timeout, max_timeout, actor_client, timer_id, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> ElectionTimerHandle<C> {
    pub(crate) fn reset_timeout(&self) {
        let timeout = self.jitter.sample(&mut rand::thread_rng());
        self.deadline.replace(self.clock.now() + timeout);
    }
}

impl<C: Clock> ElectionTimerTask<C> {
    fn new(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: actor::WeakActorClient,
        timer_id: u64,
        clock: C,
    ) -> (Self, ElectionTimerHandle<C>) {
        let deadline = SharedOption::new();
        let (stopper, stop_check) = signals::stop_signal();

        let task = ElectionTimerTask {
            deadline: deadline.clone(),
            actor_client,
            tick: ElectionTimerTick { timer_id },
            clock: clock.clone(),
            stop_check,
            retry_after: min_timeout,
        };
        let handle = ElectionTimerHandle {
            deadline,
            jitter: Uniform::new_inclusive(min_timeout, max_timeout),
            clock,
            _to_drop: stopper,
        };

        // An empty deadline means "fire now", so arm it before the task first looks.
        handle.reset_timeout();

        (task, handle)
    }

    async fn run(mut self) {
        while !self.stop_check.should_stop() {
            let Some(deadline) = self.deadline.take() else {
                // Nobody reset us while we slept. The actor may still keep its role if an
                // AppendEntries is already queued, so stay alive until the handle goes away.
                if self.actor_client.election_timeout(self.tick).await.is_err() {
                    return;
                }
                self.clock.sleep(self.retry_after).await;
                continue;
            };
            self.clock.sleep_until(deadline).await;
        }
    }
}
