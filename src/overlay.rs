//! Overlay sink.
//! The core only ever writes to this surface: highlight rectangles for
//! the suggested move in screen pixel space, and status messages with a
//! severity and optional auto-expiry. The console sink renders status
//! through the log and deduplicates repeats so a steady state does not
//! spam every tick.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::board::BoardGeometry;
use crate::error::{Error, Result};

/// Screen-space highlight rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HighlightRect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

pub trait OverlaySink {
    fn set_highlights(&mut self, rects: &[HighlightRect]);
    fn clear_highlights(&mut self);
    fn set_status(&mut self, message: &str, severity: Severity, expiry: Option<Duration>);
}

/// Console-backed sink for running without a compositor overlay.
#[derive(Debug, Default)]
pub struct ConsoleOverlay {
    last_status: Option<String>,
}

impl ConsoleOverlay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlaySink for ConsoleOverlay {
    fn set_highlights(&mut self, rects: &[HighlightRect]) {
        for rect in rects {
            info!(
                "highlight ({}, {}) {}x{}",
                rect.x, rect.y, rect.w, rect.h
            );
        }
    }

    fn clear_highlights(&mut self) {}

    fn set_status(&mut self, message: &str, severity: Severity, _expiry: Option<Duration>) {
        if self.last_status.as_deref() == Some(message) {
            return;
        }
        self.last_status = Some(message.to_string());
        match severity {
            Severity::Info | Severity::Success => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}

/// Converts a UCI move into the from/to cell coordinates of the physical
/// board, row 0 at the top of the screen.
pub fn move_to_cells(
    uci: &str,
    white_on_bottom: bool,
) -> Result<((usize, usize), (usize, usize))> {
    let bytes = uci.as_bytes();
    if bytes.len() < 4 {
        return Err(Error::InvalidMove(uci.to_string()));
    }
    let cell = |file: u8, rank: u8| -> Result<(usize, usize)> {
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return Err(Error::InvalidMove(uci.to_string()));
        }
        // Rank 8 is row 0 when white sits at the bottom.
        let mut row = (b'8' - rank) as usize;
        let mut col = (file - b'a') as usize;
        if !white_on_bottom {
            row = 7 - row;
            col = 7 - col;
        }
        Ok((row, col))
    };
    Ok((cell(bytes[0], bytes[1])?, cell(bytes[2], bytes[3])?))
}

/// Screen rectangles for a move's from and to squares.
pub fn move_to_screen_rects(
    uci: &str,
    geometry: &BoardGeometry,
    white_on_bottom: bool,
) -> Result<(HighlightRect, HighlightRect)> {
    let (from, to) = move_to_cells(uci, white_on_bottom)?;
    let rect = |(row, col): (usize, usize)| {
        let (x, y, w, h) = geometry.cell_rect(row, col);
        HighlightRect { x, y, w, h }
    };
    Ok((rect(from), rect(to)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOM: BoardGeometry = BoardGeometry {
        x: 100,
        y: 100,
        side: 800,
    };

    #[test]
    fn maps_uci_squares_to_screen_cells() {
        // e2 -> e4 with white at the bottom: e2 is row 6, col 4.
        let (from, to) = move_to_cells("e2e4", true).unwrap();
        assert_eq!(from, (6, 4));
        assert_eq!(to, (4, 4));
    }

    #[test]
    fn flipped_board_mirrors_both_axes() {
        let (from, to) = move_to_cells("e2e4", false).unwrap();
        assert_eq!(from, (1, 3));
        assert_eq!(to, (3, 3));
    }

    #[test]
    fn rects_track_the_geometry() {
        let (from, to) = move_to_screen_rects("a1h8", &GEOM, true).unwrap();
        assert_eq!(
            from,
            HighlightRect {
                x: 100,
                y: 800,
                w: 100,
                h: 100
            }
        );
        assert_eq!(
            to,
            HighlightRect {
                x: 800,
                y: 100,
                w: 100,
                h: 100
            }
        );
    }

    #[test]
    fn promotion_suffix_is_tolerated() {
        assert!(move_to_cells("e7e8q", true).is_ok());
    }

    #[test]
    fn malformed_moves_are_rejected() {
        assert!(move_to_cells("e2", true).is_err());
        assert!(move_to_cells("z9a1", true).is_err());
        assert!(move_to_cells("", true).is_err());
    }
}
