//! State change fan-out to observers.

use antiphon_core::InteractionState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Holds the current state and forwards every update to subscribers.
#[derive(Debug, Default)]
pub struct StateNotifier {
    current: AtomicU8,
    subscribers: Mutex<Vec<Sender<InteractionState>>>,
}

impl StateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current(&self) -> InteractionState {
        InteractionState::from(self.current.load(Ordering::Acquire))
    }

    pub fn subscribe(&self) -> Receiver<InteractionState> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Record `state` and deliver it. Dropped receivers are forgotten.
    pub fn publish(&self, state: InteractionState) {
        self.current.store(state.as_u8(), Ordering::Release);
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(state).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers() {
        let notifier = StateNotifier::new();
        assert_eq!(notifier.current(), InteractionState::Idle);

        let rx = notifier.subscribe();
        notifier.publish(InteractionState::Listening);
        notifier.publish(InteractionState::Listening);

        assert_eq!(notifier.current(), InteractionState::Listening);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let notifier = StateNotifier::new();
        drop(notifier.subscribe());
        let kept = notifier.subscribe();

        notifier.publish(InteractionState::Responding);

        assert_eq!(notifier.subscribers.lock().len(), 1);
        assert_eq!(kept.try_recv(), Ok(InteractionState::Responding));
    }
}
