//! Randomised checks of the board's invariants.
//!
//! Thousands of random moves are thrown at a tiled board; most are illegal,
//! which is the point: rejections must leave no trace, and every applied
//! move must keep the board consistent.

use std::collections::HashSet;
use std::sync::Arc;

use gridsync_board::geometry::within_radius;
use gridsync_board::layout::tiled_sets;
use gridsync_board::{Board, BoardConfig, BoardWriter, MoveIntent, MoveRejection, StandardRules};
use gridsync_protocol::{MoveKind, PieceId, PieceKind, Position, Side};
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

const SIZE: u16 = 32;

fn new_board() -> (BoardWriter, Board) {
    let config = BoardConfig {
        size: SIZE,
        snapshot_radius: 5,
        zone_size: 8,
        snapshot_pool_size: 8,
    };
    Board::create(config, Arc::new(StandardRules::default()), tiled_sets(SIZE))
        .expect("tiled layout is valid")
}

fn random_intent(rng: &mut StdRng, board: &Board) -> Option<MoveIntent> {
    let id = PieceId(rng.random_range(1..=(SIZE as u32 / 8).pow(2) * 32));
    let piece = board.piece(id)?;
    let to = Position::new(
        (i32::from(piece.position.x) + rng.random_range(-3..=3)).clamp(0, SIZE as i32 - 1) as u16,
        (i32::from(piece.position.y) + rng.random_range(-3..=3)).clamp(0, SIZE as i32 - 1) as u16,
    );
    let kind = match rng.random_range(0..10) {
        0 => MoveKind::Castle,
        1 => MoveKind::EnPassant,
        _ => MoveKind::Normal,
    };
    Some(MoveIntent {
        piece_id: id,
        from: piece.position,
        to,
        kind,
        side: piece.side,
    })
}

fn assert_one_piece_per_cell(board: &Board) {
    let mut seen = HashSet::new();
    for y in 0..SIZE {
        for x in 0..SIZE {
            if let Some(p) = board.piece_at(Position::new(x, y)) {
                assert_eq!(p.position, Position::new(x, y), "cell index out of sync");
                assert!(seen.insert(p.id), "{} indexed twice", p.id);
            }
        }
    }
    assert_eq!(seen.len(), board.piece_count(), "every piece sits in a cell");
}

#[test]
fn test_random_moves_keep_seqnum_equal_to_applied_count() {
    let (mut writer, board) = new_board();
    let mut rng = StdRng::seed_from_u64(7);
    let mut applied = 0u64;
    let mut last = 0u64;

    for _ in 0..5_000 {
        let Some(intent) = random_intent(&mut rng, &board) else {
            continue;
        };
        match writer.apply_move(&intent) {
            Ok(result) => {
                applied += 1;
                assert!(result.seqnum > last, "seqnum must strictly increase");
                last = result.seqnum;
                if let Some(follow_up) = result.follow_up {
                    if writer.adopt(&follow_up).is_ok() {
                        applied += 1;
                        last = board.seqnum();
                    }
                }
            }
            Err(MoveRejection::GameOver) => break,
            Err(_) => {}
        }
        assert_eq!(board.seqnum(), applied);
    }
    assert!(applied > 0, "some random moves should be legal");
}

#[test]
fn test_random_moves_never_double_occupy() {
    let (mut writer, board) = new_board();
    let mut rng = StdRng::seed_from_u64(11);

    for round in 0..3_000 {
        if let Some(intent) = random_intent(&mut rng, &board) {
            let _ = writer.apply_move(&intent);
        }
        if round % 250 == 0 {
            assert_one_piece_per_cell(&board);
        }
    }
    assert_one_piece_per_cell(&board);
}

#[test]
fn test_race_to_same_destination_first_applied_wins() {
    let (mut writer, board) = new_board();
    // In block (0, 0) the knight on (1, 7) and the pawn on (2, 6) can both
    // reach (2, 5).
    let knight = board.piece_at(Position::new(1, 7)).expect("knight");
    let pawn = board.piece_at(Position::new(2, 6)).expect("pawn");
    assert_eq!(knight.kind, PieceKind::Knight);
    assert_eq!(pawn.kind, PieceKind::Pawn);

    let target = Position::new(2, 5);
    let first = MoveIntent {
        piece_id: pawn.id,
        from: pawn.position,
        to: target,
        kind: MoveKind::Normal,
        side: Side::White,
    };
    let second = MoveIntent {
        piece_id: knight.id,
        from: knight.position,
        to: target,
        kind: MoveKind::Normal,
        side: Side::White,
    };

    assert!(writer.apply_move(&first).is_ok());
    assert_eq!(
        writer.apply_move(&second).unwrap_err(),
        MoveRejection::Occupied(target)
    );
    assert_eq!(board.piece_at(target).map(|p| p.id), Some(pawn.id));
    assert_eq!(board.seqnum(), 1);
}

#[test]
fn test_snapshot_matches_brute_force_for_random_centers() {
    let (mut writer, board) = new_board();
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..500 {
        if let Some(intent) = random_intent(&mut rng, &board) {
            let _ = writer.apply_move(&intent);
        }
    }

    for _ in 0..50 {
        let center = Position::new(rng.random_range(0..SIZE), rng.random_range(0..SIZE));
        let snapshot = board.snapshot(center);

        let got: HashSet<_> = snapshot.pieces.iter().map(|p| p.id).collect();
        let mut expected = HashSet::new();
        for y in 0..SIZE {
            for x in 0..SIZE {
                let pos = Position::new(x, y);
                if within_radius(center, pos, 5) {
                    if let Some(p) = board.piece_at(pos) {
                        expected.insert(p.id);
                    }
                }
            }
        }
        assert_eq!(got, expected, "snapshot at {center}");
        assert_eq!(got.len(), snapshot.pieces.len(), "no duplicates");
    }
}
