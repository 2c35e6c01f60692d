//! One-shot notification subscriptions (spec §3, §4.3, §9 "One-shot
//! subscriptions"). The clear-after-fan-out policy is the intended
//! contract, not an oversight: a caller interested in further changes must
//! resubscribe after every notification it receives.

/// Upper bound on simultaneously registered subscribers (spec §4.3).
pub const MAX_SUBSCRIBERS: usize = 32;

/// Longest allowed subscriber host string, per spec §3.
pub const MAX_HOST_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub host: String,
    pub port: u16,
}

/// An append-only, capacity-bounded list of subscribers, reset to empty
/// immediately after every fan-out.
#[derive(Debug, Default)]
pub struct SubscriptionList {
    subscribers: Vec<Subscriber>,
}

impl SubscriptionList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `host`/`port` for the next fan-out only. `host` is
    /// truncated to [`MAX_HOST_LEN`] bytes if longer, matching
    /// `original_source/src/supervisor/posix.c`'s fixed-size `strncpy` into
    /// its notification-record host buffer (spec §3).
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::CapacityExceeded`] if the list is already
    /// full; existing subscribers are left untouched (spec §7).
    pub fn subscribe(&mut self, mut host: String, port: u16) -> Result<(), SubscribeError> {
        if self.subscribers.len() >= MAX_SUBSCRIBERS {
            return Err(SubscribeError::CapacityExceeded);
        }
        truncate_host(&mut host);
        self.subscribers.push(Subscriber { host, port });
        Ok(())
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Clears the list. Called once per multiplexer-loop iteration in which
    /// any fan-out happened, immediately after the fan-out — never inside
    /// the per-subscriber send loop, so a fan-out always sees a consistent
    /// snapshot of who was subscribed at dispatch time.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

/// Truncates `host` to at most [`MAX_HOST_LEN`] bytes, at the nearest UTF-8
/// char boundary at or below that length.
fn truncate_host(host: &mut String) {
    if host.len() <= MAX_HOST_LEN {
        return;
    }
    let mut cut = MAX_HOST_LEN;
    while !host.is_char_boundary(cut) {
        cut -= 1;
    }
    host.truncate(cut);
}

#[derive(thiserror::Error, Debug)]
pub enum SubscribeError {
    #[error("subscriber capacity ({MAX_SUBSCRIBERS}) exceeded")]
    CapacityExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_respects_capacity() {
        let mut list = SubscriptionList::new();
        for i in 0..MAX_SUBSCRIBERS {
            list.subscribe("127.0.0.1".to_string(), 9000 + i as u16)
                .unwrap();
        }
        let err = list.subscribe("127.0.0.1".to_string(), 9999);
        assert!(matches!(err, Err(SubscribeError::CapacityExceeded)));
    }

    #[test]
    fn clear_empties_without_affecting_capacity_afterwards() {
        let mut list = SubscriptionList::new();
        list.subscribe("127.0.0.1".to_string(), 9001).unwrap();
        assert!(!list.is_empty());
        list.clear();
        assert!(list.is_empty());
        list.subscribe("127.0.0.1".to_string(), 9002).unwrap();
        assert_eq!(list.iter().count(), 1);
    }

    #[test]
    fn subscribe_truncates_oversized_host() {
        let mut list = SubscriptionList::new();
        let oversized = "h".repeat(MAX_HOST_LEN + 50);
        list.subscribe(oversized, 9001).unwrap();
        let stored = list.iter().next().expect("one subscriber");
        assert_eq!(stored.host.len(), MAX_HOST_LEN);
    }

    #[test]
    fn subscribe_leaves_short_host_untouched() {
        let mut list = SubscriptionList::new();
        list.subscribe("127.0.0.1".to_string(), 9001).unwrap();
        let stored = list.iter().next().expect("one subscriber");
        assert_eq!(stored.host, "127.0.0.1");
    }
}
