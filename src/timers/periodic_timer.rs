use crate::actor::{Event, WeakActorClient};
use crate::timers::time::{Clock, RealClock};
use std::sync::{Arc, Weak};
use tokio::time::Duration;

/// Which periodic duty a timer tick stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerTick {
    GroupCheck,
    Checkpoint,
}

/// PeriodicTimerHandle keeps its timer task alive. Dropping the handle stops the task at its next
/// wake-up without sending another tick.
pub(crate) struct PeriodicTimerHandle {
    _alive: Arc<()>,
}

struct PeriodicTimerTask<C: Clock> {
    alive: Weak<()>,
    period: Duration,
    actor_client: WeakActorClient,
    tick: TimerTick,
    clock: C,
}

impl PeriodicTimerHandle {
    pub(crate) fn spawn_timer_task(period: Duration, actor_client: WeakActorClient, tick: TimerTick) -> Self {
        let (task, handle) = PeriodicTimerTask::new(period, actor_client, tick, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> PeriodicTimerTask<C> {
    fn new(period: Duration, actor_client: WeakActorClient, tick: TimerTick, clock: C) -> (Self, PeriodicTimerHandle) {
        let alive = Arc::new(());
        let task = PeriodicTimerTask {
            alive: Arc::downgrade(&alive),
            period,
            actor_client,
            tick,
            clock,
        };

        (task, PeriodicTimerHandle { _alive: alive })
    }

    async fn run(mut self) {
        loop {
            self.clock.sleep(self.period).await;

            if self.alive.upgrade().is_none() {
                return;
            }
            if self.actor_client.notify(Event::Timer(self.tick)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::timers::test_utils::TestUtilActor;
    use crate::timers::time;

    #[tokio::test]
    async fn periodic_timer_lifecycle() {
        let period = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut controller) = time::mocked_clock();

        let (task, handle) =
            PeriodicTimerTask::new(period, strong_actor_client.weak(), TimerTick::Checkpoint, mock_clock);
        let join_handle = tokio::task::spawn(task.run());

        // Nothing before the first period elapses.
        actor.assert_no_event().await;
        controller.advance(period / 2);
        actor.assert_no_event().await;

        for _ in 0..3 {
            controller.advance(period);
            actor.assert_timer_event(TimerTick::Checkpoint).await;
            actor.assert_no_event().await;
        }

        // A big leap still yields a single tick.
        controller.advance(period * 5);
        actor.assert_timer_event(TimerTick::Checkpoint).await;
        actor.assert_no_event().await;

        drop(handle);
        controller.advance(period * 2);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn periodic_timer_exits_with_actor() {
        let period = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let (mock_clock, mut controller) = time::mocked_clock();

        let (task, _handle) =
            PeriodicTimerTask::new(period, strong_actor_client.weak(), TimerTick::GroupCheck, mock_clock);
        let join_handle = tokio::task::spawn(task.run());

        drop(strong_actor_client);
        drop(rx);
        controller.advance(period * 2);
        join_handle.await.unwrap();
    }
}
