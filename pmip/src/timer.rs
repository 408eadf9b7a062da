//! Cancelable timers for the mobility strands.
//!
//! All binding state lives on a single task per node, so timers don't touch
//! state themselves: they deliver an event back into the strand channel
//! after a delay. Every armed timer gets a fresh generation number, and the
//! entry it belongs to remembers the generation of the newest timer armed
//! for it. A firing whose generation no longer matches is stale (the timer
//! was rearmed or the entry canceled while the event was queued) and is
//! ignored by the strand.

use std::time::Duration;

use tokio::sync::mpsc;

/// Schedules delayed events onto a strand channel.
pub struct Timers<E> {
    tx: mpsc::UnboundedSender<E>,
    next_generation: u64,
}

impl<E: Send + 'static> Timers<E> {
    /// Create a new `Timers` delivering into the given strand channel.
    pub fn new(tx: mpsc::UnboundedSender<E>) -> Self {
        Timers {
            tx,
            next_generation: 0,
        }
    }

    /// Arm a timer. After `delay`, the event built by `make` from the fresh
    /// generation number is delivered on the strand channel. The generation
    /// is returned so the caller can store it and recognize stale firings.
    pub fn schedule(&mut self, delay: Duration, make: impl FnOnce(u64) -> E) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let event = make(generation);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A send error means the strand shut down, there is nobody left
            // to deliver to.
            let _ = tx.send(event);
        });
        generation
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::Timers;

    #[tokio::test(start_paused = true)]
    async fn delivers_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);

        let start = tokio::time::Instant::now();
        let generation = timers.schedule(Duration::from_secs(5), |generation| generation);

        assert_eq!(rx.recv().await, Some(generation));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn generations_are_unique_and_ordered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);

        let first = timers.schedule(Duration::from_secs(1), |generation| generation);
        let second = timers.schedule(Duration::from_secs(2), |generation| generation);
        assert_ne!(first, second);

        // The rearm invalidates the first firing: the strand would compare
        // against `second` and drop the event carrying `first`.
        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
    }
}
