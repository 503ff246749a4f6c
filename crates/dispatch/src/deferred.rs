use std::time::{Duration, Instant};

/// Single-slot debounced task handle.
///
/// At most one task is pending. Rescheduling the pending key pushes its
/// deadline out; scheduling a different key hands the displaced key back so
/// the caller can run it before anything else happens.
#[derive(Debug)]
pub(crate) struct DeferredCompile<K> {
    delay: Duration,
    pending: Option<Pending<K>>,
}

#[derive(Debug)]
struct Pending<K> {
    key: K,
    deadline: Instant,
}

impl<K: Copy + PartialEq> DeferredCompile<K> {
    pub(crate) const fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Schedule `key`; returns a different key that was pending and must be flushed now.
    #[must_use]
    pub(crate) fn schedule(&mut self, key: K, now: Instant) -> Option<K> {
        let deadline = now + self.delay;
        match self.pending.replace(Pending { key, deadline }) {
            Some(prev) if prev.key != key => Some(prev.key),
            _ => None,
        }
    }

    pub(crate) fn cancel(&mut self) -> Option<K> {
        self.pending.take().map(|p| p.key)
    }

    /// Drop the pending task only if it targets `key`.
    pub(crate) fn cancel_key(&mut self, key: K) -> bool {
        if self.pending_key() == Some(key) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Take the pending key regardless of its deadline.
    pub(crate) fn flush(&mut self) -> Option<K> {
        self.cancel()
    }

    /// Take the pending key if its deadline has passed.
    pub(crate) fn take_due(&mut self, now: Instant) -> Option<K> {
        if self.deadline().is_some_and(|deadline| deadline <= now) {
            self.cancel()
        } else {
            None
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub(crate) fn pending_key(&self) -> Option<K> {
        self.pending.as_ref().map(|p| p.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescheduling_same_key_extends_deadline() {
        let mut deferred = DeferredCompile::new(Duration::from_millis(100));
        let start = Instant::now();
        assert_eq!(deferred.schedule(1u64, start), None);
        assert_eq!(
            deferred.schedule(1u64, start + Duration::from_millis(50)),
            None
        );
        assert_eq!(
            deferred.deadline(),
            Some(start + Duration::from_millis(150))
        );
        assert_eq!(deferred.take_due(start + Duration::from_millis(120)), None);
        assert_eq!(deferred.take_due(start + Duration::from_millis(150)), Some(1));
        assert_eq!(deferred.pending_key(), None);
    }

    #[test]
    fn scheduling_other_key_returns_displaced() {
        let mut deferred = DeferredCompile::new(Duration::from_millis(100));
        let now = Instant::now();
        assert_eq!(deferred.schedule(1u64, now), None);
        assert_eq!(deferred.schedule(2u64, now), Some(1));
        assert_eq!(deferred.pending_key(), Some(2));
    }

    #[test]
    fn cancel_and_flush_empty_the_slot() {
        let mut deferred = DeferredCompile::new(Duration::from_secs(60));
        let now = Instant::now();
        let _ = deferred.schedule(7u64, now);
        assert!(!deferred.cancel_key(8));
        assert!(deferred.cancel_key(7));
        assert_eq!(deferred.deadline(), None);

        let _ = deferred.schedule(9u64, now);
        assert_eq!(deferred.flush(), Some(9));
        assert_eq!(deferred.flush(), None);
        assert_eq!(deferred.cancel(), None);
    }
}
