//! Live connections per address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{AbuseConfig, SessionError};

/// Counts live connections per remote address.
///
/// Shared behind an `Arc`: every [`ConnectionPermit`] keeps a handle so it
/// can give its slot back when dropped.
#[derive(Debug)]
pub struct ConnectionTracker {
    counts: Mutex<HashMap<IpAddr, usize>>,
    soft_limit_threshold: usize,
    max_per_ip: usize,
}

impl ConnectionTracker {
    pub fn new(soft_limit_threshold: usize, max_per_ip: usize) -> Arc<Self> {
        Arc::new(Self {
            counts: Mutex::new(HashMap::new()),
            soft_limit_threshold,
            max_per_ip,
        })
    }

    pub fn from_config(config: &AbuseConfig) -> Arc<Self> {
        Self::new(config.soft_limit_threshold, config.max_connections_per_ip)
    }

    /// Claims a connection slot for `ip`.
    ///
    /// # Errors
    /// [`SessionError::TooManyConnections`] once the address is at the cap.
    pub fn register(self: &Arc<Self>, ip: IpAddr) -> Result<ConnectionPermit, SessionError> {
        let mut counts = self.counts.lock();
        let count = counts.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            return Err(SessionError::TooManyConnections { ip, count: *count });
        }
        *count += 1;
        let risky = *count >= self.soft_limit_threshold;
        tracing::debug!(%ip, count = *count, risky, "connection registered");

        Ok(ConnectionPermit {
            tracker: Arc::clone(self),
            ip,
            risky,
        })
    }

    /// `true` when the address holds enough live connections that its
    /// sessions get the soft limits.
    pub fn is_risky(&self, ip: IpAddr) -> bool {
        self.count(ip) >= self.soft_limit_threshold
    }

    pub fn count(&self, ip: IpAddr) -> usize {
        self.counts.lock().get(&ip).copied().unwrap_or(0)
    }

    /// Number of distinct addresses with at least one live connection.
    pub fn addresses(&self) -> usize {
        self.counts.lock().len()
    }

    fn release(&self, ip: IpAddr) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&ip);
            }
        }
    }
}

/// One live connection's slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    tracker: Arc<ConnectionTracker>,
    ip: IpAddr,
    risky: bool,
}

impl ConnectionPermit {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Whether the address was over the soft-limit threshold when this
    /// connection was admitted.
    pub fn is_risky(&self) -> bool {
        self.risky
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.tracker.release(self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, last))
    }

    #[test]
    fn test_register_counts_per_address() {
        let tracker = ConnectionTracker::new(10, 10);
        let _a = tracker.register(ip(1)).unwrap();
        let _b = tracker.register(ip(1)).unwrap();
        let _c = tracker.register(ip(2)).unwrap();
        assert_eq!(tracker.count(ip(1)), 2);
        assert_eq!(tracker.count(ip(2)), 1);
        assert_eq!(tracker.addresses(), 2);
    }

    #[test]
    fn test_register_over_cap_returns_error() {
        let tracker = ConnectionTracker::new(1, 2);
        let _a = tracker.register(ip(1)).unwrap();
        let _b = tracker.register(ip(1)).unwrap();
        let err = tracker.register(ip(1)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::TooManyConnections { count: 2, .. }
        ));
        assert_eq!(tracker.count(ip(1)), 2, "refusal takes no slot");
    }

    #[test]
    fn test_permit_drop_releases_slot() {
        let tracker = ConnectionTracker::new(1, 1);
        let permit = tracker.register(ip(1)).unwrap();
        assert!(tracker.register(ip(1)).is_err());

        drop(permit);
        assert_eq!(tracker.count(ip(1)), 0);
        assert_eq!(tracker.addresses(), 0);
        assert!(tracker.register(ip(1)).is_ok());
    }

    #[test]
    fn test_is_risky_at_threshold() {
        let tracker = ConnectionTracker::new(3, 10);
        let first = tracker.register(ip(1)).unwrap();
        let _second = tracker.register(ip(1)).unwrap();
        assert!(!first.is_risky());
        assert!(!tracker.is_risky(ip(1)));

        let third = tracker.register(ip(1)).unwrap();
        assert!(third.is_risky());
        assert!(tracker.is_risky(ip(1)));
        assert!(!tracker.is_risky(ip(2)));
    }
}
