//! Countdown timer for timed recording windows
//!
//! After an initial grace delay, sends one `CountdownTick` per second for the
//! armed duration. The reducer owns the remaining-seconds count and decides
//! when the window has expired; this task only produces ticks.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::state_machine::Event;

const TICK: Duration = Duration::from_secs(1);

/// Handle to an armed countdown. Dropping it cancels the countdown.
pub struct CountdownTimer {
    session_id: Uuid,
    token: CancellationToken,
    _guard: DropGuard,
}

impl CountdownTimer {
    /// Arm a countdown for `session_id`. Ticks are delivered on `tx`.
    pub fn arm(
        session_id: Uuid,
        delay: Duration,
        duration_secs: u32,
        tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        log::debug!(
            "Countdown armed for session {}: {}s after {:?}",
            session_id,
            duration_secs,
            delay
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => return,
                _ = sleep(delay) => {}
            }

            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            for _ in 0..duration_secs {
                tokio::select! {
                    _ = cancelled.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                // Re-check: cancellation may have raced with the tick
                if cancelled.is_cancelled() {
                    return;
                }
                if tx.send(Event::CountdownTick { id: session_id }).is_err() {
                    log::debug!("Countdown stopping - controller gone");
                    return;
                }
            }
        });

        Self {
            session_id,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            log::debug!("Countdown cancelled for session {}", self.session_id);
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_ticks(rx: &mut mpsc::UnboundedReceiver<Event>, within: Duration) -> usize {
        sleep(within).await;
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, Event::CountdownTick { .. }));
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_during_grace_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = CountdownTimer::arm(Uuid::new_v4(), Duration::from_secs(3), 5, tx);

        // Delay plus just under one tick
        assert_eq!(collect_ticks(&mut rx, Duration::from_millis(3900)).await, 0);
        assert_eq!(collect_ticks(&mut rx, Duration::from_millis(200)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_exactly_duration_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let _timer = CountdownTimer::arm(id, Duration::from_millis(0), 4, tx);

        assert_eq!(collect_ticks(&mut rx, Duration::from_secs(30)).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_further_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = CountdownTimer::arm(Uuid::new_v4(), Duration::from_secs(0), 60, tx);

        assert_eq!(collect_ticks(&mut rx, Duration::from_millis(2500)).await, 2);
        timer.cancel();
        assert!(timer.is_cancelled());
        assert_eq!(collect_ticks(&mut rx, Duration::from_secs(120)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_delay_prevents_all_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = CountdownTimer::arm(Uuid::new_v4(), Duration::from_secs(3), 60, tx);

        sleep(Duration::from_secs(1)).await;
        drop(timer);
        assert_eq!(collect_ticks(&mut rx, Duration::from_secs(120)).await, 0);
    }
}
