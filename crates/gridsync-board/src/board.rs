//! The authoritative board: one writer, many readers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gridsync_protocol::{
    CapturedPiece, MoveKind, MovedPiece, PieceData, PieceId, PieceKind, Pool, Pooled, Position,
    Side, Snapshot,
};
use parking_lot::RwLock;

use crate::geometry::{in_bounds, square_bounds, within_radius};
use crate::rules::{BoardView, MovePlan, MoveRules};
use crate::{BoardConfig, BoardError, MoveRejection};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A move that has passed wire-level validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveIntent {
    pub piece_id: PieceId,
    pub from: Position,
    pub to: Position,
    pub kind: MoveKind,
    /// The side the requesting player controls.
    pub side: Side,
}

/// An applied move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub seqnum: u64,
    /// Every relocated piece, moving piece first.
    pub moved: Vec<MovedPiece>,
    pub captured: Option<CapturedPiece>,
    pub game_over: bool,
    /// Bulk change the rules want applied next.
    pub follow_up: Option<AdoptionRequest>,
}

/// Reassign every `from_side` piece within `radius` of `center` to
/// `to_side`. Kings are never adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdoptionRequest {
    pub center: Position,
    pub radius: u16,
    pub from_side: Side,
    pub to_side: Side,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoptionResult {
    pub seqnum: u64,
    /// Adopted pieces, already showing their new side.
    pub adopted: Vec<PieceData>,
    pub game_over: bool,
}

/// Square area of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub center: Position,
    pub radius: u16,
}

/// Which pieces a bulk capture removes. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureFilter {
    pub region: Option<Region>,
    pub side: Option<Side>,
    pub kind: Option<PieceKind>,
}

impl CaptureFilter {
    pub fn matches(&self, piece: &PieceData) -> bool {
        self.region
            .is_none_or(|r| within_radius(r.center, piece.position, r.radius))
            && self.side.is_none_or(|s| piece.side == s)
            && self.kind.is_none_or(|k| piece.kind == k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkCaptureRequest {
    pub filter: CaptureFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCaptureResult {
    pub seqnum: u64,
    pub captured: Vec<CapturedPiece>,
    pub game_over: bool,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct BoardState {
    size: u16,
    cells: HashMap<Position, PieceId>,
    pieces: HashMap<PieceId, PieceData>,
    counts: HashMap<(Side, PieceKind), u32>,
    /// Number of applied mutations. Starts at 0.
    seqnum: u64,
    /// Number of individual piece changes (moves, captures, adoptions).
    total_mutations: u64,
    game_over: bool,
}

impl BoardView for BoardState {
    fn size(&self) -> u16 {
        self.size
    }

    fn piece_at(&self, pos: Position) -> Option<&PieceData> {
        self.cells.get(&pos).and_then(|id| self.pieces.get(id))
    }

    fn piece(&self, id: PieceId) -> Option<&PieceData> {
        self.pieces.get(&id)
    }

    fn count(&self, side: Side, kind: PieceKind) -> u32 {
        self.counts.get(&(side, kind)).copied().unwrap_or(0)
    }
}

impl BoardState {
    fn remove(&mut self, id: PieceId) -> Option<PieceData> {
        let piece = self.pieces.remove(&id)?;
        if self.cells.get(&piece.position) == Some(&id) {
            self.cells.remove(&piece.position);
        }
        if let Some(n) = self.counts.get_mut(&(piece.side, piece.kind)) {
            *n = n.saturating_sub(1);
        }
        Some(piece)
    }

    fn change_side(&mut self, id: PieceId, to: Side) -> Option<PieceData> {
        let piece = self.pieces.get_mut(&id)?;
        if let Some(n) = self.counts.get_mut(&(piece.side, piece.kind)) {
            *n = n.saturating_sub(1);
        }
        piece.side = to;
        *self.counts.entry((to, piece.kind)).or_default() += 1;
        Some(*piece)
    }

    /// Checks a rules plan against the board's own invariants.
    fn validate_plan(&self, intent: &MoveIntent, plan: &MovePlan) -> Result<(), MoveRejection> {
        match plan.relocations.first() {
            Some(&(id, to)) if id == intent.piece_id && to == intent.to => {}
            _ => return Err(MoveRejection::InvalidPlan("first relocation must be the move")),
        }

        let mut movers = HashSet::with_capacity(plan.relocations.len());
        let mut destinations = HashSet::with_capacity(plan.relocations.len());
        for &(id, to) in &plan.relocations {
            let piece = self.pieces.get(&id).ok_or(MoveRejection::NoSuchPiece(id))?;
            if piece.side != intent.side {
                return Err(MoveRejection::WrongSide(id));
            }
            if !in_bounds(to, self.size) {
                return Err(MoveRejection::OutOfBounds(to));
            }
            if !movers.insert(id) || !destinations.insert(to) {
                return Err(MoveRejection::InvalidPlan("piece or cell used twice"));
            }
        }

        if let Some(captured) = plan.capture {
            let victim = self
                .pieces
                .get(&captured)
                .ok_or(MoveRejection::NoSuchPiece(captured))?;
            if victim.side == intent.side || movers.contains(&captured) {
                return Err(MoveRejection::InvalidPlan("capture must be an opposing piece"));
            }
        }

        // A destination is fine if empty, vacated by another mover, or held
        // by the piece being captured.
        for &(_, to) in &plan.relocations {
            match self.cells.get(&to) {
                None => {}
                Some(occupant) if movers.contains(occupant) => {}
                Some(occupant) if plan.capture == Some(*occupant) => {}
                Some(_) => return Err(MoveRejection::Occupied(to)),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cloneable read handle.
#[derive(Clone)]
pub struct Board {
    state: Arc<RwLock<BoardState>>,
    config: Arc<BoardConfig>,
    snapshots: Pool<Snapshot>,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Board")
            .field("size", &self.config.size)
            .field("seqnum", &state.seqnum)
            .field("pieces", &state.pieces.len())
            .field("game_over", &state.game_over)
            .finish()
    }
}

/// The single mutation handle. Not `Clone`: exactly one writer exists.
pub struct BoardWriter {
    board: Board,
    rules: Arc<dyn MoveRules>,
}

impl Board {
    /// Builds a board from an initial layout and returns its writer and a
    /// reader.
    pub fn create(
        config: BoardConfig,
        rules: Arc<dyn MoveRules>,
        pieces: impl IntoIterator<Item = PieceData>,
    ) -> Result<(BoardWriter, Board), BoardError> {
        let mut state = BoardState {
            size: config.size,
            cells: HashMap::new(),
            pieces: HashMap::new(),
            counts: HashMap::new(),
            seqnum: 0,
            total_mutations: 0,
            game_over: false,
        };

        for piece in pieces {
            if !in_bounds(piece.position, config.size) {
                return Err(BoardError::InvalidLayout(format!(
                    "{} placed outside the board at {}",
                    piece.id, piece.position
                )));
            }
            if state.cells.insert(piece.position, piece.id).is_some() {
                return Err(BoardError::InvalidLayout(format!(
                    "two pieces at {}",
                    piece.position
                )));
            }
            if state.pieces.insert(piece.id, piece).is_some() {
                return Err(BoardError::InvalidLayout(format!("{} used twice", piece.id)));
            }
            *state.counts.entry((piece.side, piece.kind)).or_default() += 1;
        }

        tracing::info!(
            size = config.size,
            pieces = state.pieces.len(),
            "board created"
        );

        let board = Board {
            state: Arc::new(RwLock::new(state)),
            snapshots: Pool::new(config.snapshot_pool_size),
            config: Arc::new(config),
        };
        let writer = BoardWriter {
            board: board.clone(),
            rules,
        };
        Ok((writer, board))
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn size(&self) -> u16 {
        self.config.size
    }

    pub fn seqnum(&self) -> u64 {
        self.state.read().seqnum
    }

    pub fn total_mutations(&self) -> u64 {
        self.state.read().total_mutations
    }

    pub fn is_game_over(&self) -> bool {
        self.state.read().game_over
    }

    pub fn piece(&self, id: PieceId) -> Option<PieceData> {
        self.state.read().pieces.get(&id).copied()
    }

    pub fn piece_at(&self, pos: Position) -> Option<PieceData> {
        self.state.read().piece_at(pos).copied()
    }

    pub fn piece_count(&self) -> usize {
        self.state.read().pieces.len()
    }

    /// All live pieces within the snapshot radius of `center`.
    ///
    /// The snapshot lives in a pooled buffer and goes back to the pool
    /// when the returned guard is dropped.
    pub fn snapshot(&self, center: Position) -> Pooled<Snapshot> {
        let radius = self.config.snapshot_radius;
        let mut snapshot = self.snapshots.get();
        snapshot.center = center;

        let state = self.state.read();
        snapshot.seqnum = state.seqnum;
        if !in_bounds(center, state.size) {
            return snapshot;
        }

        let (lo, hi) = square_bounds(center, radius, state.size);
        let area = (usize::from(hi.x - lo.x) + 1) * (usize::from(hi.y - lo.y) + 1);
        if area < state.pieces.len() {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    if let Some(piece) = state.piece_at(Position::new(x, y)) {
                        snapshot.pieces.push(*piece);
                    }
                }
            }
        } else {
            snapshot.pieces.extend(
                state
                    .pieces
                    .values()
                    .filter(|p| within_radius(center, p.position, radius))
                    .copied(),
            );
        }
        snapshot
    }
}

impl BoardWriter {
    /// A read handle onto the same board.
    pub fn reader(&self) -> Board {
        self.board.clone()
    }

    /// Validates and applies one move.
    pub fn apply_move(&mut self, intent: &MoveIntent) -> Result<MoveResult, MoveRejection> {
        let mut state = self.board.state.write();
        if state.game_over {
            return Err(MoveRejection::GameOver);
        }
        for pos in [intent.from, intent.to] {
            if !in_bounds(pos, state.size) {
                return Err(MoveRejection::OutOfBounds(pos));
            }
        }
        if intent.from == intent.to {
            return Err(MoveRejection::NoMovement);
        }

        let piece = *state
            .pieces
            .get(&intent.piece_id)
            .ok_or(MoveRejection::NoSuchPiece(intent.piece_id))?;
        if piece.position != intent.from {
            return Err(MoveRejection::NotAtPosition {
                piece: piece.id,
                at: intent.from,
            });
        }
        if piece.side != intent.side {
            return Err(MoveRejection::WrongSide(piece.id));
        }

        let plan = self.rules.plan(&*state, &piece, intent)?;
        state.validate_plan(intent, &plan)?;

        // Validated: apply.
        state.seqnum += 1;
        let seqnum = state.seqnum;

        let victim = plan.capture.and_then(|id| state.remove(id));
        let captured = victim.map(|v| CapturedPiece {
            piece_id: v.id,
            position: v.position,
            seqnum,
        });

        let mut origins = Vec::with_capacity(plan.relocations.len());
        for &(id, _) in &plan.relocations {
            if let Some(p) = state.pieces.get(&id) {
                let from = p.position;
                if state.cells.get(&from) == Some(&id) {
                    state.cells.remove(&from);
                }
                origins.push((id, from));
            }
        }

        let mut moved = Vec::with_capacity(plan.relocations.len());
        for (&(id, to), (_, from)) in plan.relocations.iter().zip(origins) {
            if let Some(p) = state.pieces.get_mut(&id) {
                p.position = to;
                p.move_count = p.move_count.saturating_add(1);
                if id == intent.piece_id && captured.is_some() {
                    p.capture_count = p.capture_count.saturating_add(1);
                }
                let after = *p;
                state.cells.insert(to, id);
                moved.push(MovedPiece {
                    from,
                    piece: after,
                    seqnum,
                });
            }
        }

        state.total_mutations += (moved.len() + usize::from(captured.is_some())) as u64;
        state.game_over = self.rules.is_game_over(&*state);

        Ok(MoveResult {
            seqnum,
            moved,
            captured,
            game_over: state.game_over,
            follow_up: victim.and_then(|v| self.rules.follow_up(&v, intent.side)),
        })
    }

    /// Hands pieces over to another side.
    ///
    /// A follow-up adoption is still applied after the game ends, since it
    /// completes the capture that ended it.
    pub fn adopt(&mut self, request: &AdoptionRequest) -> Result<AdoptionResult, BoardError> {
        let mut state = self.board.state.write();
        let ids: Vec<PieceId> = state
            .pieces
            .values()
            .filter(|p| {
                p.side == request.from_side
                    && p.kind != PieceKind::King
                    && within_radius(request.center, p.position, request.radius)
            })
            .map(|p| p.id)
            .collect();
        if ids.is_empty() || request.from_side == request.to_side {
            return Err(BoardError::NothingAffected);
        }

        state.seqnum += 1;
        let seqnum = state.seqnum;
        let adopted: Vec<PieceData> = ids
            .into_iter()
            .filter_map(|id| state.change_side(id, request.to_side))
            .collect();
        state.total_mutations += adopted.len() as u64;
        state.game_over = state.game_over || self.rules.is_game_over(&*state);

        Ok(AdoptionResult {
            seqnum,
            adopted,
            game_over: state.game_over,
        })
    }

    /// Removes every piece matching `request.filter`.
    pub fn bulk_capture(
        &mut self,
        request: &BulkCaptureRequest,
    ) -> Result<BulkCaptureResult, BoardError> {
        let mut state = self.board.state.write();
        if state.game_over {
            return Err(BoardError::GameOver);
        }
        let ids: Vec<PieceId> = state
            .pieces
            .values()
            .filter(|p| request.filter.matches(p))
            .map(|p| p.id)
            .collect();
        if ids.is_empty() {
            return Err(BoardError::NothingAffected);
        }

        state.seqnum += 1;
        let seqnum = state.seqnum;
        let captured: Vec<CapturedPiece> = ids
            .into_iter()
            .filter_map(|id| state.remove(id))
            .map(|p| CapturedPiece {
                piece_id: p.id,
                position: p.position,
                seqnum,
            })
            .collect();
        state.total_mutations += captured.len() as u64;
        state.game_over = self.rules.is_game_over(&*state);

        Ok(BulkCaptureResult {
            seqnum,
            captured,
            game_over: state.game_over,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StandardRules;

    fn piece(id: u32, kind: PieceKind, side: Side, x: u16, y: u16) -> PieceData {
        PieceData {
            id: PieceId(id),
            kind,
            side,
            position: Position::new(x, y),
            move_count: 0,
            capture_count: 0,
        }
    }

    fn config(size: u16, snapshot_radius: u16) -> BoardConfig {
        BoardConfig {
            size,
            snapshot_radius,
            zone_size: 8,
            snapshot_pool_size: 4,
        }
    }

    fn create(size: u16, pieces: Vec<PieceData>) -> (BoardWriter, Board) {
        Board::create(config(size, 2), Arc::new(StandardRules::default()), pieces).unwrap()
    }

    fn base_pieces() -> Vec<PieceData> {
        vec![
            piece(1, PieceKind::King, Side::White, 0, 0),
            piece(2, PieceKind::King, Side::Black, 9, 9),
            piece(3, PieceKind::Rook, Side::White, 4, 4),
            piece(4, PieceKind::Pawn, Side::Black, 5, 5),
            piece(5, PieceKind::Pawn, Side::Black, 6, 4),
        ]
    }

    fn rook_move(to: (u16, u16)) -> MoveIntent {
        MoveIntent {
            piece_id: PieceId(3),
            from: Position::new(4, 4),
            to: Position::new(to.0, to.1),
            kind: MoveKind::Normal,
            side: Side::White,
        }
    }

    // =====================================================================
    // create()
    // =====================================================================

    #[test]
    fn test_create_rejects_double_occupancy() {
        let pieces = vec![
            piece(1, PieceKind::King, Side::White, 1, 1),
            piece(2, PieceKind::King, Side::Black, 1, 1),
        ];
        let result = Board::create(config(10, 2), Arc::new(StandardRules::default()), pieces);
        assert!(matches!(result, Err(BoardError::InvalidLayout(_))));
    }

    #[test]
    fn test_create_rejects_out_of_bounds_piece() {
        let pieces = vec![piece(1, PieceKind::King, Side::White, 10, 0)];
        let result = Board::create(config(10, 2), Arc::new(StandardRules::default()), pieces);
        assert!(matches!(result, Err(BoardError::InvalidLayout(_))));
    }

    #[test]
    fn test_create_starts_at_seqnum_zero() {
        let (_, board) = create(10, base_pieces());
        assert_eq!(board.seqnum(), 0);
        assert_eq!(board.total_mutations(), 0);
        assert_eq!(board.piece_count(), 5);
    }

    // =====================================================================
    // apply_move()
    // =====================================================================

    #[test]
    fn test_apply_move_to_empty_cell_advances_seqnum() {
        let (mut writer, board) = create(10, base_pieces());

        let result = writer.apply_move(&rook_move((4, 1))).unwrap();

        assert_eq!(result.seqnum, 1);
        assert_eq!(board.seqnum(), 1);
        assert_eq!(result.moved[0].from, Position::new(4, 4));
        assert_eq!(result.moved[0].piece.position, Position::new(4, 1));
        assert_eq!(result.moved[0].piece.move_count, 1);
        assert!(board.piece_at(Position::new(4, 4)).is_none());
        assert_eq!(board.piece_at(Position::new(4, 1)).map(|p| p.id), Some(PieceId(3)));
    }

    #[test]
    fn test_apply_move_capture_removes_victim() {
        let (mut writer, board) = create(10, base_pieces());

        let result = writer.apply_move(&rook_move((6, 4))).unwrap();

        let captured = result.captured.unwrap();
        assert_eq!(captured.piece_id, PieceId(5));
        assert_eq!(captured.seqnum, 1);
        assert!(board.piece(PieceId(5)).is_none());
        assert_eq!(board.piece(PieceId(3)).unwrap().capture_count, 1);
        assert_eq!(board.total_mutations(), 2);
        assert!(!result.game_over);
        assert!(result.follow_up.is_none());
    }

    #[test]
    fn test_apply_move_rejection_leaves_seqnum() {
        let (mut writer, board) = create(10, base_pieces());

        let wrong_from = MoveIntent {
            from: Position::new(3, 3),
            ..rook_move((4, 1))
        };
        assert!(matches!(
            writer.apply_move(&wrong_from),
            Err(MoveRejection::NotAtPosition { .. })
        ));
        let wrong_side = MoveIntent {
            side: Side::Black,
            ..rook_move((4, 1))
        };
        assert_eq!(
            writer.apply_move(&wrong_side).unwrap_err(),
            MoveRejection::WrongSide(PieceId(3))
        );
        assert_eq!(
            writer.apply_move(&rook_move((4, 10))).unwrap_err(),
            MoveRejection::OutOfBounds(Position::new(4, 10))
        );
        assert_eq!(
            writer.apply_move(&rook_move((4, 4))).unwrap_err(),
            MoveRejection::NoMovement
        );
        assert_eq!(board.seqnum(), 0);
    }

    #[test]
    fn test_apply_move_after_game_over_is_rejected() {
        let (mut writer, board) = create(10, base_pieces());
        writer
            .bulk_capture(&BulkCaptureRequest {
                filter: CaptureFilter {
                    kind: Some(PieceKind::King),
                    side: Some(Side::Black),
                    ..CaptureFilter::default()
                },
            })
            .unwrap();
        assert!(board.is_game_over());

        assert_eq!(
            writer.apply_move(&rook_move((4, 1))).unwrap_err(),
            MoveRejection::GameOver
        );
    }

    // =====================================================================
    // adopt() / bulk_capture()
    // =====================================================================

    #[test]
    fn test_adopt_changes_side_and_skips_kings() {
        let (mut writer, board) = create(10, base_pieces());

        let result = writer
            .adopt(&AdoptionRequest {
                center: Position::new(7, 7),
                radius: 3,
                from_side: Side::Black,
                to_side: Side::White,
            })
            .unwrap();

        let mut ids: Vec<_> = result.adopted.iter().map(|p| p.id).collect();
        ids.sort();
        assert_eq!(ids, vec![PieceId(4), PieceId(5)]);
        assert!(result.adopted.iter().all(|p| p.side == Side::White));
        assert_eq!(board.piece(PieceId(2)).unwrap().side, Side::Black);
        assert_eq!(result.seqnum, 1);
    }

    #[test]
    fn test_adopt_nothing_matching_leaves_seqnum() {
        let (mut writer, board) = create(10, base_pieces());

        let result = writer.adopt(&AdoptionRequest {
            center: Position::new(0, 9),
            radius: 1,
            from_side: Side::Black,
            to_side: Side::White,
        });

        assert_eq!(result.unwrap_err(), BoardError::NothingAffected);
        assert_eq!(board.seqnum(), 0);
    }

    #[test]
    fn test_bulk_capture_removes_matching_pieces() {
        let (mut writer, board) = create(10, base_pieces());

        let result = writer
            .bulk_capture(&BulkCaptureRequest {
                filter: CaptureFilter {
                    kind: Some(PieceKind::Pawn),
                    ..CaptureFilter::default()
                },
            })
            .unwrap();

        assert_eq!(result.captured.len(), 2);
        assert_eq!(board.piece_count(), 3);
        assert_eq!(board.seqnum(), 1);
        assert!(!result.game_over);
    }

    #[test]
    fn test_bulk_capture_region_filter() {
        let (mut writer, board) = create(10, base_pieces());

        let result = writer
            .bulk_capture(&BulkCaptureRequest {
                filter: CaptureFilter {
                    region: Some(Region {
                        center: Position::new(5, 5),
                        radius: 0,
                    }),
                    ..CaptureFilter::default()
                },
            })
            .unwrap();

        assert_eq!(result.captured.len(), 1);
        assert_eq!(result.captured[0].piece_id, PieceId(4));
        assert!(board.piece_at(Position::new(5, 5)).is_none());
    }

    // =====================================================================
    // snapshot()
    // =====================================================================

    #[test]
    fn test_snapshot_returns_pieces_within_radius() {
        let (_, board) = create(10, base_pieces());

        let snapshot = board.snapshot(Position::new(5, 5));

        let mut ids: Vec<_> = snapshot.pieces.iter().map(|p| p.id).collect();
        ids.sort();
        assert_eq!(ids, vec![PieceId(3), PieceId(4), PieceId(5)]);
        assert_eq!(snapshot.center, Position::new(5, 5));
    }

    #[test]
    fn test_snapshot_cell_scan_matches_piece_scan() {
        // Radius 0 covers one cell, fewer than the five pieces, so the cell
        // walk is used.
        let (_, board) = Board::create(
            config(10, 0),
            Arc::new(StandardRules::default()),
            base_pieces(),
        )
        .unwrap();

        let snapshot = board.snapshot(Position::new(4, 4));
        assert_eq!(snapshot.pieces.len(), 1);
        assert_eq!(snapshot.pieces[0].id, PieceId(3));
    }

    #[test]
    fn test_snapshot_buffer_returns_to_pool() {
        let (_, board) = create(10, base_pieces());
        drop(board.snapshot(Position::new(0, 0)));
        assert_eq!(board.snapshots.idle(), 1);
        let again = board.snapshot(Position::new(9, 9));
        assert!(again.pieces.iter().all(|p| p.position != Position::new(0, 0)));
    }
}
