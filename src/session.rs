//! One game session's scan-cycle state machine.
//! Owns every piece of mutable session state: the template store, the
//! turn tracker, the move selector, and the opponent estimator. The
//! caller drives it with frames and engine results; the session never
//! performs I/O itself, which keeps the whole cycle testable without a
//! screen or an engine process.
//!
//! Engine queries run outside and may be superseded: results are only
//! applied while their position is still the accepted one.

use image::RgbaImage;
use tracing::{debug, warn};

use crate::board::{BoardGeometry, fen_for};
use crate::detect;
use crate::elo::OpponentEstimator;
use crate::engine::EngineCandidate;
use crate::overlay::{HighlightRect, move_to_screen_rects};
use crate::recognize;
use crate::select::{MoveSelector, SelectionStats};
use crate::template::{TemplateStore, auto_calibrate};
use crate::turn::{Color, TurnTracker, TurnUpdate};

/// Below this many recognized pieces the board is mid-animation or
/// partially obscured; analysis would be garbage.
pub const MIN_PIECES: u32 = 4;

/// What the scan loop should do after one processed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// No board-colored region on screen; keep scanning.
    BoardNotFound,
    /// Board found with an empty store; calibration saved this many
    /// templates.
    Calibrated(usize),
    /// Board found, but calibration produced nothing usable.
    CalibrationFailed,
    /// Too few pieces recognized to trust the position.
    TooFewPieces(u32),
    /// Nothing newly stable this tick.
    NoStableChange,
    /// Stable position with the opponent to move.
    OpponentTurn,
    /// Stable position, our turn: run an engine query for `fen` and feed
    /// the result back through [`ScanSession::apply_candidates`].
    QueryEngine { position: String, fen: String },
}

/// A chosen move ready for the overlay.
#[derive(Clone, Debug)]
pub struct Suggestion {
    pub mv: String,
    pub loss_cp: i32,
    pub is_best: bool,
    pub rects: Option<(HighlightRect, HighlightRect)>,
}

pub struct ScanSession {
    player_color: Color,
    min_board_area: u32,
    candidate_count: usize,
    store: TemplateStore,
    tracker: TurnTracker,
    selector: MoveSelector,
    estimator: OpponentEstimator,
    geometry: Option<BoardGeometry>,
    white_on_bottom: bool,
    piece_count: u32,
    /// Eval of our last chosen move; the drop the opponent fails to
    /// inflict on it estimates their centipawn loss.
    expected_eval: Option<i32>,
}

impl ScanSession {
    pub fn new(
        player_color: Color,
        store: TemplateStore,
        min_board_area: u32,
        candidate_count: usize,
    ) -> Self {
        Self {
            player_color,
            min_board_area,
            candidate_count,
            store,
            tracker: TurnTracker::new(),
            selector: MoveSelector::new(),
            estimator: OpponentEstimator::new(),
            geometry: None,
            white_on_bottom: true,
            piece_count: 0,
            expected_eval: None,
        }
    }

    /// Starts a new game as `color`, discarding all session state.
    pub fn reset(&mut self, color: Color) {
        self.player_color = color;
        self.tracker.reset();
        self.selector.reset();
        self.estimator.reset();
        self.geometry = None;
        self.piece_count = 0;
        self.expected_eval = None;
    }

    pub fn player_color(&self) -> Color {
        self.player_color
    }

    pub fn template_count(&self) -> usize {
        self.store.len()
    }

    pub fn stats(&self) -> SelectionStats {
        self.selector.stats()
    }

    pub fn opponent_estimate(&self) -> Option<u32> {
        self.estimator.estimate()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    /// Runs locate -> calibrate/recognize -> debounce over one frame.
    pub fn process_frame(&mut self, frame: &RgbaImage) -> TickAction {
        let Some(geometry) = detect::locate(frame, self.min_board_area) else {
            self.geometry = None;
            return TickAction::BoardNotFound;
        };
        self.geometry = Some(geometry);

        if self.store.is_empty() {
            return match auto_calibrate(frame, &geometry, &mut self.store) {
                Ok(saved) if saved > 0 => TickAction::Calibrated(saved),
                Ok(_) => TickAction::CalibrationFailed,
                Err(e) => {
                    warn!("calibration failed: {}", e);
                    TickAction::CalibrationFailed
                }
            };
        }

        let position = recognize::assemble(frame, &geometry, &self.store);
        self.white_on_bottom = position.white_on_bottom;

        let piece_count = position.piece_count();
        if piece_count < MIN_PIECES {
            return TickAction::TooFewPieces(piece_count);
        }

        match self.tracker.observe(&position.canonical()) {
            TurnUpdate::NoChange => TickAction::NoStableChange,
            TurnUpdate::Accepted { position, turn } => {
                self.piece_count = piece_count;
                if turn == self.player_color {
                    let fen = fen_for(&position, turn.fen_char());
                    TickAction::QueryEngine { position, fen }
                } else {
                    TickAction::OpponentTurn
                }
            }
        }
    }

    /// Applies an engine candidate list for `position`. Results for a
    /// position that is no longer the accepted one are stale and
    /// discarded; the same applies when the turn moved on.
    pub fn apply_candidates(
        &mut self,
        position: &str,
        candidates: &[EngineCandidate],
    ) -> Option<Suggestion> {
        if self.tracker.accepted_position() != Some(position) {
            debug!("discarding stale engine result");
            return None;
        }
        if self.tracker.accepted_turn() != self.player_color {
            return None;
        }

        // The opponent's previous move preserved our expected eval only
        // if it was best play; any surplus is their loss.
        if let (Some(expected), Some(best)) = (self.expected_eval, candidates.first()) {
            let cpl = (best.eval_cp - expected).max(0) as f64;
            self.estimator.record_move(cpl);
        }

        let selection = self.selector.choose(
            candidates,
            self.piece_count,
            self.estimator.estimate(),
        )?;
        self.expected_eval = Some(candidates[0].eval_cp - selection.loss_cp);

        let rects = self.geometry.and_then(|g| {
            move_to_screen_rects(&selection.mv, &g, self.white_on_bottom).ok()
        });
        Some(Suggestion {
            mv: selection.mv,
            loss_cp: selection.loss_cp,
            is_best: selection.is_best,
            rects,
        })
    }

    /// Applies a plain best-move fallback (the zero-candidate path).
    /// No selection bookkeeping: the model never saw alternatives.
    pub fn apply_fallback(&mut self, position: &str, mv: Option<String>) -> Option<Suggestion> {
        if self.tracker.accepted_position() != Some(position) {
            debug!("discarding stale engine result");
            return None;
        }
        // No eval came back with a bare best move, so the opponent-loss
        // baseline restarts here.
        self.expected_eval = None;
        let mv = mv?;
        let rects = self
            .geometry
            .and_then(|g| move_to_screen_rects(&mv, &g, self.white_on_bottom).ok());
        Some(Suggestion {
            mv,
            loss_cp: 0,
            is_best: true,
            rects,
        })
    }
}
