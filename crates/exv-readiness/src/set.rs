//! Working state of one readiness wait.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Required services, the subset already seen ready, and the deadline.
///
/// Created at the start of a wait and discarded at its end.
#[derive(Debug, Clone)]
pub struct ServiceReadinessSet {
    required: BTreeSet<String>,
    ready: BTreeSet<String>,
    deadline: Instant,
}

impl ServiceReadinessSet {
    pub fn new(required: BTreeSet<String>, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            required,
            ready: BTreeSet::new(),
            deadline: now
                .checked_add(timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
        }
    }

    /// Services not yet seen ready.
    pub fn pending(&self) -> impl Iterator<Item = &String> {
        self.required.difference(&self.ready)
    }

    /// Record a service as ready. Unknown names are ignored.
    ///
    /// Returns true if this call added it.
    pub fn mark_ready(&mut self, service: &str) -> bool {
        if !self.required.contains(service) {
            return false;
        }
        self.ready.insert(service.to_string())
    }

    pub fn is_ready(&self, service: &str) -> bool {
        self.ready.contains(service)
    }

    pub fn is_complete(&self) -> bool {
        self.ready.len() == self.required.len()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Time until the deadline, zero once it has passed.
    pub fn time_left(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Required minus ready.
    pub fn remaining(&self) -> BTreeSet<String> {
        self.pending().cloned().collect()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn required_count(&self) -> usize {
        self.required.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> ServiceReadinessSet {
        let required = names.iter().map(|s| s.to_string()).collect();
        ServiceReadinessSet::new(required, Duration::from_secs(10))
    }

    #[test]
    fn starts_with_everything_pending() {
        let s = set(&["a", "b"]);
        assert_eq!(s.pending().count(), 2);
        assert!(!s.is_complete());
        assert_eq!(s.ready_count(), 0);
        assert_eq!(s.required_count(), 2);
    }

    #[test]
    fn marking_is_monotonic_and_idempotent() {
        let mut s = set(&["a", "b"]);
        assert!(s.mark_ready("a"));
        assert!(!s.mark_ready("a"));
        assert!(s.is_ready("a"));
        assert_eq!(s.remaining(), BTreeSet::from(["b".to_string()]));

        assert!(s.mark_ready("b"));
        assert!(s.is_complete());
        assert!(s.remaining().is_empty());
    }

    #[test]
    fn unknown_names_are_ignored() {
        let mut s = set(&["a"]);
        assert!(!s.mark_ready("zzz"));
        assert!(!s.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_at_deadline() {
        let s = set(&["a"]);
        assert!(!s.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(s.is_expired(Instant::now()));
        assert_eq!(s.time_left(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_does_not_overflow() {
        let s = ServiceReadinessSet::new(
            ["a".to_string()].into_iter().collect(),
            Duration::from_secs(u64::MAX),
        );
        assert!(!s.is_expired(Instant::now()));
        assert!(s.time_left(Instant::now()) > Duration::from_secs(86_400));
    }
}
