//! Position and zone math.
//!
//! All distances are per-axis (Chebyshev): a cell is "within radius r" of a
//! center when both its x and y differ by at most r. Zones are square
//! `zone_size × zone_size` tiles used only for interest management.

use gridsync_protocol::Position;
use serde::{Deserialize, Serialize};

/// A coarse square tile of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId {
    pub x: u16,
    pub y: u16,
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "zone({}, {})", self.x, self.y)
    }
}

/// Converts wire coordinates to a board position, or `None` if out of
/// bounds.
pub fn checked_position(x: u32, y: u32, size: u16) -> Option<Position> {
    let size = u32::from(size);
    if x < size && y < size {
        // Both are below a u16 value, so the casts are lossless.
        Some(Position::new(x as u16, y as u16))
    } else {
        None
    }
}

pub fn in_bounds(pos: Position, size: u16) -> bool {
    pos.x < size && pos.y < size
}

/// Absolute difference of two coordinates.
pub fn axis_distance(a: u16, b: u16) -> u16 {
    a.abs_diff(b)
}

/// Per-axis maximum distance between two cells.
pub fn chebyshev(a: Position, b: Position) -> u16 {
    axis_distance(a.x, b.x).max(axis_distance(a.y, b.y))
}

pub fn within_radius(center: Position, pos: Position, radius: u16) -> bool {
    chebyshev(center, pos) <= radius
}

/// Inclusive corners of the square of `radius` around `center`, clipped to
/// the board.
pub fn square_bounds(center: Position, radius: u16, size: u16) -> (Position, Position) {
    let max = size.saturating_sub(1);
    let lo = Position::new(
        center.x.saturating_sub(radius),
        center.y.saturating_sub(radius),
    );
    let hi = Position::new(
        center.x.saturating_add(radius).min(max),
        center.y.saturating_add(radius).min(max),
    );
    (lo, hi)
}

/// The zone containing `pos`.
pub fn zone_of(pos: Position, zone_size: u16) -> ZoneId {
    let zone_size = zone_size.max(1);
    ZoneId {
        x: pos.x / zone_size,
        y: pos.y / zone_size,
    }
}

/// Every zone that overlaps the square of `radius` around `center`.
pub fn zones_covering(
    center: Position,
    radius: u16,
    zone_size: u16,
    board_size: u16,
) -> impl Iterator<Item = ZoneId> {
    let (lo, hi) = square_bounds(center, radius, board_size);
    let lo = zone_of(lo, zone_size);
    let hi = zone_of(hi, zone_size);
    (lo.y..=hi.y).flat_map(move |y| (lo.x..=hi.x).map(move |x| ZoneId { x, y }))
}

/// Cell reached by moving `(dx, dy)` from `pos`, if it is on the board.
pub fn offset(pos: Position, dx: i32, dy: i32, size: u16) -> Option<Position> {
    let x = i32::from(pos.x) + dx;
    let y = i32::from(pos.y) + dy;
    if x < 0 || y < 0 {
        return None;
    }
    checked_position(x as u32, y as u32, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_position_rejects_edge_and_beyond() {
        assert_eq!(checked_position(9, 0, 10), Some(Position::new(9, 0)));
        assert_eq!(checked_position(10, 0, 10), None);
        assert_eq!(checked_position(0, u32::MAX, 10), None);
    }

    #[test]
    fn test_chebyshev_takes_larger_axis() {
        assert_eq!(chebyshev(Position::new(0, 0), Position::new(3, 7)), 7);
        assert_eq!(chebyshev(Position::new(5, 5), Position::new(2, 4)), 3);
    }

    #[test]
    fn test_within_radius_is_inclusive() {
        let c = Position::new(10, 10);
        assert!(within_radius(c, Position::new(13, 7), 3));
        assert!(!within_radius(c, Position::new(14, 10), 3));
    }

    #[test]
    fn test_square_bounds_clips_to_board() {
        let (lo, hi) = square_bounds(Position::new(1, 98), 5, 100);
        assert_eq!(lo, Position::new(0, 93));
        assert_eq!(hi, Position::new(6, 99));
    }

    #[test]
    fn test_zone_of_divides_by_zone_size() {
        assert_eq!(zone_of(Position::new(31, 32), 32), ZoneId { x: 0, y: 1 });
    }

    #[test]
    fn test_zones_covering_spans_overlapping_zones() {
        let zones: Vec<_> = zones_covering(Position::new(32, 5), 4, 32, 128).collect();
        assert_eq!(
            zones,
            vec![ZoneId { x: 0, y: 0 }, ZoneId { x: 1, y: 0 }]
        );
    }

    #[test]
    fn test_zones_covering_single_zone_when_contained() {
        let zones: Vec<_> = zones_covering(Position::new(16, 16), 4, 32, 128).collect();
        assert_eq!(zones, vec![ZoneId { x: 0, y: 0 }]);
    }

    #[test]
    fn test_offset_off_board_returns_none() {
        assert_eq!(offset(Position::new(0, 0), -1, 0, 8), None);
        assert_eq!(offset(Position::new(7, 7), 1, 0, 8), None);
        assert_eq!(offset(Position::new(3, 3), 2, -1, 8), Some(Position::new(5, 2)));
    }
}
