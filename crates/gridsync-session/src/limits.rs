//! Per-session limiter presets.

use serde::{Deserialize, Serialize};

use crate::RateLimiter;

/// Rate and capacity of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub per_second: f64,
    pub burst: u32,
}

impl BucketConfig {
    pub const fn new(per_second: f64, burst: u32) -> Self {
        Self { per_second, burst }
    }

    fn build(&self) -> RateLimiter {
        RateLimiter::new(self.per_second, self.burst)
    }
}

/// Bucket settings for every rate-limited concern of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Snapshot re-sends triggered by movement.
    pub snapshots: BucketConfig,
    /// Moves forwarded to the authoritative loop.
    pub moves: BucketConfig,
    /// Inbound frames of any kind. Exceeding it closes the session.
    pub messages: BucketConfig,
    /// `InvalidMove` replies and disguised `ValidMove` replies.
    pub rejections: BucketConfig,
    /// `InvalidMove` replies after the game has ended.
    pub game_over_notices: BucketConfig,
    /// Message tokens spent before the session starts.
    pub pre_spent_messages: u32,
}

impl LimitsConfig {
    /// Limits for ordinary sessions.
    pub fn standard() -> Self {
        Self {
            snapshots: BucketConfig::new(3.0, 6),
            moves: BucketConfig::new(2.0, 4),
            messages: BucketConfig::new(15.0, 15),
            rejections: BucketConfig::new(1.5, 3),
            game_over_notices: BucketConfig::new(0.2, 1),
            pre_spent_messages: 0,
        }
    }

    /// Limits for sessions from addresses with many live connections.
    pub fn soft() -> Self {
        let messages = BucketConfig::new(10.0, 10);
        Self {
            snapshots: BucketConfig::new(1.0, 3),
            moves: BucketConfig::new(1.0, 3),
            rejections: BucketConfig::new(1.5, 3),
            game_over_notices: BucketConfig::new(0.2, 1),
            pre_spent_messages: messages.burst / 3,
            messages,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// One session's set of limiters.
#[derive(Debug)]
pub struct Limiters {
    pub snapshots: RateLimiter,
    pub moves: RateLimiter,
    pub messages: RateLimiter,
    pub rejections: RateLimiter,
    pub game_over_notices: RateLimiter,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        let limiters = Self {
            snapshots: config.snapshots.build(),
            moves: config.moves.build(),
            messages: config.messages.build(),
            rejections: config.rejections.build(),
            game_over_notices: config.game_over_notices.build(),
        };
        if config.pre_spent_messages > 0 {
            let _ = limiters.messages.allow_n(config.pre_spent_messages);
        }
        limiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_limits_are_tighter_than_standard() {
        let standard = LimitsConfig::standard();
        let soft = LimitsConfig::soft();
        assert!(soft.snapshots.per_second < standard.snapshots.per_second);
        assert!(soft.moves.per_second < standard.moves.per_second);
        assert!(soft.messages.per_second < standard.messages.per_second);
        assert_eq!(soft.rejections, standard.rejections);
    }

    #[test]
    fn test_soft_limits_pre_spend_third_of_messages() {
        assert_eq!(LimitsConfig::soft().pre_spent_messages, 3);
        assert_eq!(LimitsConfig::standard().pre_spent_messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiters_new_applies_pre_spend() {
        let limiters = Limiters::new(&LimitsConfig::soft());
        assert_eq!(limiters.messages.available(), 7);

        let limiters = Limiters::new(&LimitsConfig::standard());
        assert_eq!(limiters.messages.available(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiters_new_moves_bounded_by_burst() {
        let limiters = Limiters::new(&LimitsConfig::standard());
        let accepted = (0..20).filter(|_| limiters.moves.allow()).count();
        assert_eq!(accepted, 4);
    }
}
