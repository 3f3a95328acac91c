//! Banned addresses and the bot heuristic.
//!
//! Neither of these rejects anything visibly. The session actor answers
//! moves from a banned or suspected address with a fabricated `ValidMove`,
//! so the client cannot tell it has been caught.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Thresholds for abuse detection and connection accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Sliding window over which accepted moves are counted per address.
    pub bot_window: Duration,

    /// More accepted moves than this within `bot_window` marks the address
    /// as a suspected bot.
    pub bot_move_threshold: usize,

    /// Live connections from one address at which new sessions get the
    /// soft limits.
    pub soft_limit_threshold: usize,

    /// Live connections from one address beyond which new connections are
    /// refused.
    pub max_connections_per_ip: usize,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            bot_window: Duration::from_secs(10),
            bot_move_threshold: 40,
            soft_limit_threshold: 4,
            max_connections_per_ip: 64,
        }
    }
}

/// Addresses whose moves are silently discarded.
#[derive(Debug, Default)]
pub struct IpBanList {
    banned: RwLock<HashSet<IpAddr>>,
}

impl IpBanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the address was not already banned.
    pub fn ban(&self, ip: IpAddr) -> bool {
        let added = self.banned.write().insert(ip);
        if added {
            tracing::info!(%ip, "address banned");
        }
        added
    }

    pub fn unban(&self, ip: IpAddr) -> bool {
        let removed = self.banned.write().remove(&ip);
        if removed {
            tracing::info!(%ip, "address unbanned");
        }
        removed
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned.read().contains(&ip)
    }

    pub fn len(&self) -> usize {
        self.banned.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.read().is_empty()
    }
}

/// Counts accepted moves per address over a sliding window.
///
/// An address that keeps a sustained move rate no human could manage is
/// suspected of running a bot. The count covers every session from the
/// address, so spreading moves across connections does not help.
#[derive(Debug)]
pub struct BotDetector {
    window: Duration,
    threshold: usize,
    moves: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl BotDetector {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            moves: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AbuseConfig) -> Self {
        Self::new(config.bot_window, config.bot_move_threshold)
    }

    /// Records one accepted move from `ip`.
    pub fn record_move(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut moves = self.moves.lock();
        let times = moves.entry(ip).or_default();
        expire(times, now, self.window);
        times.push_back(now);
        if times.len() == self.threshold + 1 {
            tracing::warn!(%ip, count = times.len(), "address suspected of botting");
        }
    }

    pub fn is_suspected(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut moves = self.moves.lock();
        let Some(times) = moves.get_mut(&ip) else {
            return false;
        };
        expire(times, now, self.window);
        times.len() > self.threshold
    }

    /// Drops addresses with no moves inside the window.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.moves.lock().retain(|_, times| {
            expire(times, now, window);
            !times.is_empty()
        });
    }

    pub fn tracked_addresses(&self) -> usize {
        self.moves.lock().len()
    }
}

fn expire(times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while times
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) > window)
    {
        times.pop_front();
    }
}
