//! Initial piece placement.

use gridsync_protocol::{PieceData, PieceId, PieceKind, Position, Side};

const BACK_RANK: [PieceKind; 8] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

/// Standard chess sets tiled across the board, one per 8×8 block.
///
/// Black holds the top two rows of each block and White the bottom two, so
/// White advances toward smaller `y`. Ids are assigned from 1 upwards.
/// Partial blocks at the right and bottom edges stay empty.
pub fn tiled_sets(board_size: u16) -> Vec<PieceData> {
    let blocks = board_size / 8;
    let mut pieces = Vec::with_capacity(usize::from(blocks) * usize::from(blocks) * 32);
    let mut next_id = 1u32;

    for by in 0..blocks {
        for bx in 0..blocks {
            let (ox, oy) = (bx * 8, by * 8);
            let rows = [
                (0, Side::Black, true),
                (1, Side::Black, false),
                (6, Side::White, false),
                (7, Side::White, true),
            ];
            for (row, side, back) in rows {
                for col in 0..8u16 {
                    let kind = if back {
                        BACK_RANK[usize::from(col)]
                    } else {
                        PieceKind::Pawn
                    };
                    pieces.push(PieceData {
                        id: PieceId(next_id),
                        kind,
                        side,
                        position: Position::new(ox + col, oy + row),
                        move_count: 0,
                        capture_count: 0,
                    });
                    next_id += 1;
                }
            }
        }
    }
    pieces
}
