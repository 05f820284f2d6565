//! Turn tracking: debounce of recognized positions plus diff-based turn
//! inference. A position is accepted only after it is seen twice in a
//! row, which filters the single-frame misreads that template matching
//! produces during piece animations. The side that moved is read off the
//! diff between the accepted and the incoming position; ambiguous diffs
//! fall back to a rules-validity check.

use std::cmp::Ordering;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position};
use tracing::{debug, trace};

use crate::board::{canonical_cells, fen_for};

/// Consecutive identical observations required before a change is
/// accepted.
pub const STABILITY_THRESHOLD: u32 = 2;

/// More differing cells than this is treated as classification noise:
/// the position is still accepted but no turn inference happens.
pub const NOISE_CELL_LIMIT: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn other(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn fen_char(self) -> char {
        match self {
            Color::White => 'w',
            Color::Black => 'b',
        }
    }
}

/// Outcome of feeding one observed position to the tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnUpdate {
    /// Nothing newly stable this tick.
    NoChange,
    /// A changed position passed the debounce.
    Accepted { position: String, turn: Color },
}

/// Session-long debounce and turn state. Reset when a new game starts.
#[derive(Debug)]
pub struct TurnTracker {
    accepted: Option<String>,
    accepted_turn: Color,
    pending: Option<String>,
    pending_count: u32,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTracker {
    pub fn new() -> Self {
        Self {
            accepted: None,
            accepted_turn: Color::White,
            pending: None,
            pending_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn accepted_position(&self) -> Option<&str> {
        self.accepted.as_deref()
    }

    pub fn accepted_turn(&self) -> Color {
        self.accepted_turn
    }

    /// Feeds one observed canonical position through the state machine.
    pub fn observe(&mut self, canonical: &str) -> TurnUpdate {
        if self.accepted.as_deref() == Some(canonical) {
            self.pending = None;
            self.pending_count = 0;
            return TurnUpdate::NoChange;
        }

        if self.pending.as_deref() == Some(canonical) {
            self.pending_count += 1;
        } else {
            self.pending = Some(canonical.to_string());
            self.pending_count = 1;
        }

        if self.pending_count < STABILITY_THRESHOLD {
            trace!("pending position, {}/{}", self.pending_count, STABILITY_THRESHOLD);
            return TurnUpdate::NoChange;
        }

        self.pending = None;
        self.pending_count = 0;

        let turn = match &self.accepted {
            Some(prev) => infer_turn(prev, canonical, self.accepted_turn),
            // First stable position of the session: nothing to diff.
            None => self.accepted_turn,
        };
        self.accepted = Some(canonical.to_string());
        self.accepted_turn = turn;
        debug!("accepted position, {:?} to move", turn);
        TurnUpdate::Accepted {
            position: canonical.to_string(),
            turn,
        }
    }
}

/// Infers whose turn it is after `next` replaced `prev`.
fn infer_turn(prev: &str, next: &str, prev_turn: Color) -> Color {
    let (Some(before), Some(after)) = (canonical_cells(prev), canonical_cells(next)) else {
        return prev_turn;
    };

    let mut differing = 0usize;
    let mut white_arrivals = 0u32;
    let mut black_arrivals = 0u32;
    for i in 0..64 {
        if before[i] == after[i] {
            continue;
        }
        differing += 1;
        if let Some(piece) = after[i] {
            if piece.is_ascii_uppercase() {
                white_arrivals += 1;
            } else {
                black_arrivals += 1;
            }
        }
    }

    if differing > NOISE_CELL_LIMIT {
        debug!("{} cells changed, treating as noise", differing);
        return prev_turn;
    }

    match white_arrivals.cmp(&black_arrivals) {
        Ordering::Greater => Color::Black,
        Ordering::Less => Color::White,
        Ordering::Equal => {
            // Ambiguous diff. Try the toggled turn first, then the
            // previous one; keep the previous turn when neither reads as
            // a playable position.
            let toggled = prev_turn.other();
            if position_is_playable(next, toggled) {
                toggled
            } else {
                prev_turn
            }
        }
    }
}

/// Rules oracle: does the placement parse as a legal position with `turn`
/// to move, with at least one legal move available?
pub fn position_is_playable(placement: &str, turn: Color) -> bool {
    let fen = fen_for(placement, turn.fen_char());
    let Ok(parsed) = Fen::from_ascii(fen.as_bytes()) else {
        return false;
    };
    match parsed.into_position::<Chess>(CastlingMode::Standard) {
        Ok(pos) => !pos.legal_moves().is_empty(),
        Err(_) => false,
    }
}
