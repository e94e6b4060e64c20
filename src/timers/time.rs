#[cfg(test)]
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

#[async_trait::async_trait]
pub(crate) trait Clock: Clone {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);
    let sleeper = MockClock { current_time: rx };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (sleeper, controller)
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    current_time: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        loop {
            if *self.current_time.borrow() >= deadline {
                return;
            }

            self.current_time.changed().await.expect("Controller dropped");
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    current_time: watch::Sender<Instant>,
    time_of_instantiation: Instant,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        *self.current_time.borrow()
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.current_time() - self.time_of_instantiation
    }

    /// A sleeper only promises to wake once `now` is at or past its deadline. Advance in steps
    /// smaller than the granularity you want to observe.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let new_now = *self.current_time.borrow() + duration;
        self.current_time.send(new_now).expect("MockClock dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_clock() {
        let tick_duration = Duration::from_millis(500);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (mut mock_clock, mut controller) = mocked_clock();
        let test_start_time = controller.current_time();

        tokio::spawn(async move {
            let mut next_wake = test_start_time;
            loop {
                next_wake += tick_duration;
                mock_clock.sleep_until(next_wake).await;
                if tx.send(()).is_err() {
                    return;
                }
            }
        });

        // Half-tick offset keeps the assertions away from exact deadlines.
        controller.advance(tick_duration / 2);
        tokio::time::timeout(tick_duration * 2, rx.recv())
            .await
            .expect_err("Expected timeout");

        controller.advance(tick_duration);
        rx.recv().await.unwrap();
        tokio::time::timeout(tick_duration * 2, rx.recv())
            .await
            .expect_err("Expected timeout");

        controller.advance(tick_duration * 3);
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        tokio::time::timeout(tick_duration * 2, rx.recv())
            .await
            .expect_err("Expected timeout");

        assert_eq!(controller.elapsed_time(), tick_duration * 9 / 2);
    }
}
