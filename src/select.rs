//! Human-like move selection with adaptive accuracy.
//!
//! Instead of always playing the engine's #1 move, the selector samples
//! from the top candidates with a softmax over eval deltas. The softmax
//! temperature adapts to game phase, position pressure, eval trend, move
//! criticality, the estimated opponent strength, and an anti-engine
//! smoothing term that breaks up suspiciously long best-move streaks.
//! When losing, temperature drops sharply toward near-engine play; when
//! comfortable it rises toward natural human variance.

use rand::Rng;
use rand::rngs::SmallRng;
use tracing::debug;

use crate::engine::EngineCandidate;

/// How many ranked candidates to request from the engine.
pub const NUM_CANDIDATES: usize = 5;

/// How many best-evals to look back for trend detection.
const TREND_WINDOW: usize = 6;

/// Game phase, discrete by total piece count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePhase {
    Opening,
    EarlyMiddle,
    Middlegame,
    Endgame,
}

impl GamePhase {
    pub fn from_piece_count(count: u32) -> Self {
        if count >= 28 {
            GamePhase::Opening
        } else if count >= 22 {
            GamePhase::EarlyMiddle
        } else if count >= 16 {
            GamePhase::Middlegame
        } else {
            GamePhase::Endgame
        }
    }

    /// Base temperature: humans know opening theory, err most in complex
    /// early middlegames, and sharpen up again in endgames.
    fn base_temperature(self) -> f64 {
        match self {
            GamePhase::Opening => 45.0,
            GamePhase::EarlyMiddle => 70.0,
            GamePhase::Middlegame => 60.0,
            GamePhase::Endgame => 35.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GamePhase::Opening => "opening",
            GamePhase::EarlyMiddle => "early_middle",
            GamePhase::Middlegame => "middlegame",
            GamePhase::Endgame => "endgame",
        }
    }
}

/// Session accuracy bookkeeping, reported through the status surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub total_moves: u32,
    pub best_move_hits: u32,
    pub total_centipawn_loss: i64,
}

impl SelectionStats {
    pub fn best_move_rate(&self) -> f64 {
        if self.total_moves == 0 {
            return 0.0;
        }
        self.best_move_hits as f64 / self.total_moves as f64
    }
}

/// One selected move plus the factors that produced it.
#[derive(Clone, Debug)]
pub struct Selection {
    pub mv: String,
    pub loss_cp: i32,
    pub is_best: bool,
    pub phase: GamePhase,
    pub temperature: f64,
}

pub struct MoveSelector {
    eval_history: Vec<i32>,
    move_number: u32,
    consecutive_best: u32,
    stats: SelectionStats,
    rng: SmallRng,
}

impl MoveSelector {
    pub fn new() -> Self {
        use rand::SeedableRng;
        Self::with_rng(SmallRng::from_entropy())
    }

    pub fn with_rng(rng: SmallRng) -> Self {
        Self {
            eval_history: Vec::new(),
            move_number: 0,
            consecutive_best: 0,
            stats: SelectionStats::default(),
            rng,
        }
    }

    /// Clears all state for a new game.
    pub fn reset(&mut self) {
        self.eval_history.clear();
        self.move_number = 0;
        self.consecutive_best = 0;
        self.stats = SelectionStats::default();
    }

    pub fn stats(&self) -> SelectionStats {
        self.stats
    }

    /// Picks a move from a best-first candidate list. `None` only when
    /// the list is empty (the caller falls back to a plain best-move
    /// query in that case).
    pub fn choose(
        &mut self,
        candidates: &[EngineCandidate],
        piece_count: u32,
        opponent_elo: Option<u32>,
    ) -> Option<Selection> {
        let top = candidates.first()?;
        let phase = GamePhase::from_piece_count(piece_count);

        if candidates.len() == 1 {
            self.record(true, 0);
            return Some(Selection {
                mv: top.mv.clone(),
                loss_cp: 0,
                is_best: true,
                phase,
                temperature: 0.0,
            });
        }

        let best_eval = top.eval_cp;
        self.eval_history.push(best_eval);
        if self.eval_history.len() > TREND_WINDOW {
            self.eval_history.remove(0);
        }

        let pressure = pressure(best_eval);
        let trend = self.trend_urgency();
        let crit = criticality(candidates);
        let opponent = opponent_factor(opponent_elo);
        let temperature = self.temperature(phase, pressure, trend, crit, opponent);

        let index = self.weighted_select(candidates, temperature);
        let chosen = &candidates[index];
        let loss_cp = best_eval - chosen.eval_cp;
        let is_best = index == 0;
        self.record(is_best, loss_cp);

        debug!(
            "{} move={} loss={}cp temp={:.0} phase={} pressure={:.2} trend={:.2} crit={:.2}",
            if is_best { "*" } else { " " },
            chosen.mv,
            loss_cp,
            temperature,
            phase.label(),
            pressure,
            trend,
            crit,
        );

        Some(Selection {
            mv: chosen.mv.clone(),
            loss_cp,
            is_best,
            phase,
            temperature,
        })
    }

    /// Higher temperature flattens the candidate distribution (more
    /// human variance); lower sharpens it toward the engine choice.
    fn temperature(
        &self,
        phase: GamePhase,
        pressure: f64,
        trend_urgency: f64,
        criticality: f64,
        opponent_factor: f64,
    ) -> f64 {
        let mut base = phase.base_temperature();

        // First ~6 plies: memorized book lines, less variance.
        if self.move_number < 6 {
            base *= 0.55 + (self.move_number as f64 / 6.0) * 0.45;
        }

        let pressure_factor = 0.08 + 0.92 * pressure;
        let trend_factor = 1.0 - 0.55 * trend_urgency;
        let crit_factor = 1.0 - 0.65 * criticality;

        // Too many consecutive engine-best moves looks suspicious.
        let anti_engine = if self.consecutive_best >= 5 {
            (1.0 + 0.07 * (self.consecutive_best - 4) as f64).min(1.35)
        } else {
            1.0
        };

        let temperature =
            base * pressure_factor * trend_factor * crit_factor * anti_engine * opponent_factor;

        // Keep a floor so there is always some chance of deviation;
        // desperate positions get near-engine accuracy instead.
        if pressure <= 0.15 {
            temperature.max(3.0)
        } else {
            temperature.max(8.0)
        }
    }

    /// 0 = stable or improving, toward 1 = eval collapsing.
    fn trend_urgency(&self) -> f64 {
        if self.eval_history.len() < 3 {
            return 0.0;
        }
        let window = &self.eval_history[self.eval_history.len().saturating_sub(TREND_WINDOW)..];
        let n = window.len();
        let x_mean = (n - 1) as f64 / 2.0;
        let y_mean = window.iter().map(|&v| v as f64).sum::<f64>() / n as f64;

        let mut numer = 0.0;
        let mut denom = 0.0;
        for (i, &v) in window.iter().enumerate() {
            let dx = i as f64 - x_mean;
            numer += dx * (v as f64 - y_mean);
            denom += dx * dx;
        }
        if denom == 0.0 {
            return 0.0;
        }
        let slope = numer / denom;
        if slope >= 0.0 {
            0.0
        } else {
            (slope.abs() / 100.0).min(1.0)
        }
    }

    /// Softmax sample over eval deltas from the top candidate.
    fn weighted_select(&mut self, candidates: &[EngineCandidate], temperature: f64) -> usize {
        let best_eval = candidates[0].eval_cp;
        let weights: Vec<f64> = candidates
            .iter()
            .map(|c| {
                let delta = (best_eval - c.eval_cp) as f64;
                let exponent = (-delta / temperature.max(1.0)).max(-20.0);
                exponent.exp()
            })
            .collect();

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0;
        }
        let mut r = self.rng.gen_range(0.0..total);
        for (i, w) in weights.iter().enumerate() {
            if r < *w {
                return i;
            }
            r -= w;
        }
        weights.len() - 1
    }

    fn record(&mut self, is_best: bool, loss_cp: i32) {
        if is_best {
            self.consecutive_best += 1;
            self.stats.best_move_hits += 1;
        } else {
            self.consecutive_best = 0;
        }
        self.move_number += 1;
        self.stats.total_moves += 1;
        self.stats.total_centipawn_loss += loss_cp as i64;
    }
}

impl Default for MoveSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// How much trouble the mover is in: 0 = desperate, 1.1 = dominating.
/// Piecewise linear in the best candidate's eval, clamped outside
/// [-400, 400].
fn pressure(eval_cp: i32) -> f64 {
    let e = eval_cp as f64;
    if e <= -400.0 {
        0.0
    } else if e <= -200.0 {
        0.25 * (e + 400.0) / 200.0
    } else if e <= -100.0 {
        0.25 + 0.25 * (e + 200.0) / 100.0
    } else if e <= 0.0 {
        0.50 + 0.25 * (e + 100.0) / 100.0
    } else if e <= 150.0 {
        0.75 + 0.25 * e / 150.0
    } else if e <= 400.0 {
        1.0 + 0.1 * (e - 150.0) / 250.0
    } else {
        1.1
    }
}

/// 0 = many reasonable options, 1 = one clearly best move. When the gap
/// between the top two candidates is wide, even a human finds the move.
fn criticality(candidates: &[EngineCandidate]) -> f64 {
    if candidates.len() < 2 {
        return 1.0;
    }
    let gap = (candidates[0].eval_cp - candidates[1].eval_cp) as f64;
    if gap <= 30.0 {
        0.0
    } else {
        ((gap - 30.0) / 170.0).min(1.0)
    }
}

/// Strong opponents warrant tighter play, weak ones more variance.
/// Piecewise linear in the estimated ELO; 1.0 when no estimate exists.
fn opponent_factor(elo: Option<u32>) -> f64 {
    let Some(elo) = elo else {
        return 1.0;
    };
    let e = elo as f64;
    if e >= 2200.0 {
        0.6
    } else if e >= 1800.0 {
        0.8 + (0.6 - 0.8) * (e - 1800.0) / 400.0
    } else if e >= 1400.0 {
        1.0 + (0.8 - 1.0) * (e - 1400.0) / 400.0
    } else if e >= 1000.0 {
        1.15 + (1.0 - 1.15) * (e - 1000.0) / 400.0
    } else {
        1.2
    }
}
