//! Board configuration.

use serde::{Deserialize, Serialize};

/// Size and snapshot settings for a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Width and height in cells. Coordinates run `0..size`.
    pub size: u16,

    /// Edge length of the square zones used for interest management.
    pub zone_size: u16,

    /// Chebyshev radius of a snapshot around its center.
    pub snapshot_radius: u16,

    /// How many recycled snapshot buffers to keep.
    pub snapshot_pool_size: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            size: 512,
            zone_size: 32,
            snapshot_radius: 32,
            snapshot_pool_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_config_default() {
        let config = BoardConfig::default();
        assert_eq!(config.size, 512);
        assert_eq!(config.snapshot_radius, 32);
        assert_eq!(config.size % 8, 0, "default must tile whole chess sets");
    }
}
