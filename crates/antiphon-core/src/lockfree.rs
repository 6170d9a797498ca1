//! Lock-free one-shot signal flags.

use std::sync::atomic::{AtomicBool, Ordering};

/// Cache-line aligned edge-triggered flag.
///
/// Producers call [`raise`](Self::raise) from any thread; the single consumer
/// acts on it and then calls [`clear`](Self::clear) or [`take`](Self::take).
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct SignalFlag {
    value: AtomicBool,
}

impl SignalFlag {
    pub fn new() -> Self {
        Self {
            value: AtomicBool::new(false),
        }
    }

    /// Idempotent set.
    #[inline]
    pub fn raise(&self) {
        self.value.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clear(&self) {
        self.value.store(false, Ordering::Release);
    }

    /// Test-and-clear. Returns whether the flag was raised.
    #[inline]
    pub fn take(&self) -> bool {
        self.value.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_raise_is_idempotent() {
        let flag = SignalFlag::new();
        flag.raise();
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_raise_from_other_thread() {
        let flag = Arc::new(SignalFlag::new());
        let producer = Arc::clone(&flag);
        std::thread::spawn(move || producer.raise()).join().unwrap();
        assert!(flag.is_raised());
        flag.clear();
        assert!(!flag.is_raised());
    }
}
