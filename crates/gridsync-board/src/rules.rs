//! Pluggable move legality.
//!
//! The board owns the invariants that must hold whatever the game: bounds,
//! one piece per cell, a player only moves their own pieces, the sequence
//! number. Everything else (how a knight moves, what castling means, when
//! the game ends) is decided by a [`MoveRules`] implementation.

use gridsync_protocol::{MoveKind, PieceData, PieceId, PieceKind, Position, Side};

use crate::geometry::{checked_position, offset};
use crate::{AdoptionRequest, MoveIntent, MoveRejection};

/// Read access to the board while a rule is being evaluated.
pub trait BoardView {
    fn size(&self) -> u16;
    fn piece_at(&self, pos: Position) -> Option<&PieceData>;
    fn piece(&self, id: PieceId) -> Option<&PieceData>;
    /// Number of live pieces of this side and kind.
    fn count(&self, side: Side, kind: PieceKind) -> u32;
}

/// What a legal move does to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    /// Pieces to relocate. The first entry is always the moving piece and
    /// its requested destination; more entries describe multi-piece moves.
    pub relocations: Vec<(PieceId, Position)>,
    /// The piece removed by this move, if any.
    pub capture: Option<PieceId>,
}

impl MovePlan {
    pub fn single(piece: PieceId, to: Position, capture: Option<PieceId>) -> Self {
        Self {
            relocations: vec![(piece, to)],
            capture,
        }
    }
}

/// Game rules consulted by the board writer.
pub trait MoveRules: Send + Sync + 'static {
    /// Decides whether `intent` is legal for `piece` and what it changes.
    ///
    /// The board has already checked bounds, that `piece` is at
    /// `intent.from`, that it belongs to `intent.side`, and that the move
    /// goes somewhere.
    fn plan(
        &self,
        view: &dyn BoardView,
        piece: &PieceData,
        intent: &MoveIntent,
    ) -> Result<MovePlan, MoveRejection>;

    /// Checked after every applied mutation.
    fn is_game_over(&self, view: &dyn BoardView) -> bool;

    /// A bulk change to apply right after a capture, as its own mutation.
    fn follow_up(&self, _captured: &PieceData, _capturer: Side) -> Option<AdoptionRequest> {
        None
    }
}

// ---------------------------------------------------------------------------
// StandardRules
// ---------------------------------------------------------------------------

/// Chess movement on an open board.
///
/// White advances toward smaller `y`. Sliding pieces are capped at
/// `max_slide` cells so one move cannot cross the whole board. A side with
/// no kings left loses, and capturing a king hands the victim's nearby
/// pieces to the capturer.
#[derive(Debug, Clone)]
pub struct StandardRules {
    pub max_slide: u16,
    pub adoption_radius: u16,
}

impl Default for StandardRules {
    fn default() -> Self {
        Self {
            max_slide: 32,
            adoption_radius: 7,
        }
    }
}

fn forward(side: Side) -> i32 {
    match side {
        Side::White => -1,
        Side::Black => 1,
    }
}

impl StandardRules {
    fn path_clear(&self, view: &dyn BoardView, from: Position, dx: i32, dy: i32) -> bool {
        let steps = dx.abs().max(dy.abs());
        let (sx, sy) = (dx.signum(), dy.signum());
        (1..steps).all(|i| {
            offset(from, sx * i, sy * i, view.size())
                .is_some_and(|cell| view.piece_at(cell).is_none())
        })
    }

    fn slide_ok(&self, view: &dyn BoardView, from: Position, dx: i32, dy: i32) -> bool {
        dx.abs().max(dy.abs()) <= i32::from(self.max_slide) && self.path_clear(view, from, dx, dy)
    }

    fn plan_normal(
        &self,
        view: &dyn BoardView,
        piece: &PieceData,
        intent: &MoveIntent,
    ) -> Result<MovePlan, MoveRejection> {
        let dx = i32::from(intent.to.x) - i32::from(intent.from.x);
        let dy = i32::from(intent.to.y) - i32::from(intent.from.y);
        let (ax, ay) = (dx.abs(), dy.abs());
        let target = view.piece_at(intent.to);

        let capture = match target {
            Some(other) if other.side == piece.side => {
                return Err(MoveRejection::Occupied(intent.to));
            }
            Some(other) => Some(other.id),
            None => None,
        };

        let legal = match piece.kind {
            PieceKind::King => ax.max(ay) == 1,
            PieceKind::Knight => (ax == 1 && ay == 2) || (ax == 2 && ay == 1),
            PieceKind::Rook => (dx == 0) != (dy == 0) && self.slide_ok(view, intent.from, dx, dy),
            PieceKind::Bishop => ax == ay && self.slide_ok(view, intent.from, dx, dy),
            PieceKind::Queen => {
                ((dx == 0) != (dy == 0) || ax == ay) && self.slide_ok(view, intent.from, dx, dy)
            }
            PieceKind::Pawn => {
                let fwd = forward(piece.side);
                if dx == 0 && dy == fwd {
                    capture.is_none()
                } else if dx == 0 && dy == 2 * fwd {
                    piece.move_count == 0
                        && capture.is_none()
                        && self.path_clear(view, intent.from, dx, dy)
                } else if ax == 1 && dy == fwd {
                    capture.is_some()
                } else {
                    false
                }
            }
        };

        if !legal {
            return Err(MoveRejection::Illegal("piece cannot move that way"));
        }
        Ok(MovePlan::single(piece.id, intent.to, capture))
    }

    fn plan_castle(
        &self,
        view: &dyn BoardView,
        piece: &PieceData,
        intent: &MoveIntent,
    ) -> Result<MovePlan, MoveRejection> {
        let dx = i32::from(intent.to.x) - i32::from(intent.from.x);
        if piece.kind != PieceKind::King || piece.move_count != 0 {
            return Err(MoveRejection::Illegal("only an unmoved king can castle"));
        }
        if intent.to.y != intent.from.y || dx.abs() != 2 {
            return Err(MoveRejection::Illegal("castling moves the king two cells"));
        }

        let dir = dx.signum();
        let size = view.size();
        // The king's path must be empty; the rook is the first piece met
        // after it, at most four cells from the king.
        for k in 1..=4 {
            let Some(cell) = offset(intent.from, dir * k, 0, size) else {
                break;
            };
            match view.piece_at(cell) {
                None => continue,
                Some(rook)
                    if k >= 3
                        && rook.kind == PieceKind::Rook
                        && rook.side == piece.side
                        && rook.move_count == 0 =>
                {
                    let crossed = offset(intent.from, dir, 0, size)
                        .ok_or(MoveRejection::OutOfBounds(intent.from))?;
                    return Ok(MovePlan {
                        relocations: vec![(piece.id, intent.to), (rook.id, crossed)],
                        capture: None,
                    });
                }
                Some(_) => return Err(MoveRejection::Illegal("castling path is blocked")),
            }
        }
        Err(MoveRejection::Illegal("no rook to castle with"))
    }

    fn plan_en_passant(
        &self,
        view: &dyn BoardView,
        piece: &PieceData,
        intent: &MoveIntent,
    ) -> Result<MovePlan, MoveRejection> {
        let dx = i32::from(intent.to.x) - i32::from(intent.from.x);
        let dy = i32::from(intent.to.y) - i32::from(intent.from.y);
        if piece.kind != PieceKind::Pawn || dx.abs() != 1 || dy != forward(piece.side) {
            return Err(MoveRejection::Illegal("en passant is a diagonal pawn step"));
        }
        if view.piece_at(intent.to).is_some() {
            return Err(MoveRejection::Occupied(intent.to));
        }
        let beside = checked_position(u32::from(intent.to.x), u32::from(intent.from.y), view.size())
            .ok_or(MoveRejection::OutOfBounds(intent.to))?;
        match view.piece_at(beside) {
            Some(victim)
                if victim.kind == PieceKind::Pawn
                    && victim.side != piece.side
                    && victim.move_count == 1 =>
            {
                Ok(MovePlan::single(piece.id, intent.to, Some(victim.id)))
            }
            _ => Err(MoveRejection::Illegal("nothing to capture en passant")),
        }
    }
}

impl MoveRules for StandardRules {
    fn plan(
        &self,
        view: &dyn BoardView,
        piece: &PieceData,
        intent: &MoveIntent,
    ) -> Result<MovePlan, MoveRejection> {
        match intent.kind {
            MoveKind::Normal => self.plan_normal(view, piece, intent),
            MoveKind::Castle => self.plan_castle(view, piece, intent),
            MoveKind::EnPassant => self.plan_en_passant(view, piece, intent),
        }
    }

    fn is_game_over(&self, view: &dyn BoardView) -> bool {
        view.count(Side::White, PieceKind::King) == 0 || view.count(Side::Black, PieceKind::King) == 0
    }

    fn follow_up(&self, captured: &PieceData, capturer: Side) -> Option<AdoptionRequest> {
        (captured.kind == PieceKind::King).then(|| AdoptionRequest {
            center: captured.position,
            radius: self.adoption_radius,
            from_side: captured.side,
            to_side: capturer,
        })
    }
}
