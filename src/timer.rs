use std::time::Duration;

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};

/// A one-shot timer that delivers `msg` after `delay`. Dropping the timer
/// cancels it; a message that already fired stays in the channel, so
/// receivers compare tokens where that matters.
#[derive(Debug)]
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    pub fn after<T: Send + 'static>(delay: Duration, tx: UnboundedSender<T>, msg: T) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
        Self { handle }
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn should_deliver_after_delay() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when
        let timer = Timer::after(Duration::from_millis(500), tx, 7);
        tokio::time::sleep(Duration::from_millis(499)).await;
        let early = rx.try_recv();
        tokio::time::sleep(Duration::from_millis(2)).await;

        // then
        assert!(early.is_err());
        assert_eq!(rx.try_recv().ok(), Some(7));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_fire_once_dropped() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = Timer::after(Duration::from_millis(100), tx, ());

        // when
        drop(timer);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // then
        assert!(rx.try_recv().is_err());
    }
}
