//! Session-level protection for gridsync.
//!
//! Everything in here answers one question for the session actor: should
//! this client be allowed to do this right now?
//!
//! 1. **Rate limiting**: token buckets per concern ([`RateLimiter`],
//!    grouped per session in [`Limiters`]).
//! 2. **Abuse mitigation**: banned addresses ([`IpBanList`]) and a
//!    move-frequency bot heuristic ([`BotDetector`]).
//! 3. **Connection accounting**: live connections per address
//!    ([`ConnectionTracker`]), which decides whether a new session gets
//!    the soft limits.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server crate (above)  ← session actor consults limiters before acting
//!     ↕
//! Session Layer (this crate)  ← limiters, bans, per-IP accounting
//! ```

mod abuse;
mod connections;
mod error;
mod limiter;
mod limits;

pub use abuse::{AbuseConfig, BotDetector, IpBanList};
pub use connections::{ConnectionPermit, ConnectionTracker};
pub use error::SessionError;
pub use limiter::RateLimiter;
pub use limits::{BucketConfig, Limiters, LimitsConfig};
