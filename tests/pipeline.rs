//! End-to-end pipeline tests on synthetic frames: a painted two-tone
//! board with distinct per-piece markers is calibrated, recognized,
//! debounced, and turned into move suggestions without a screen or an
//! engine process.

use std::path::PathBuf;

use image::{Rgba, RgbaImage};

use kibitzer_rs::board::{STARTING_PLACEMENT, parse_canonical};
use kibitzer_rs::detect::MIN_BOARD_AREA;
use kibitzer_rs::engine::EngineCandidate;
use kibitzer_rs::select::GamePhase;
use kibitzer_rs::session::{ScanSession, TickAction};
use kibitzer_rs::template::{PIECE_NAMES, TemplateStore};
use kibitzer_rs::turn::Color;

const GREEN: Rgba<u8> = Rgba([118, 150, 86, 255]);
const BEIGE: Rgba<u8> = Rgba([238, 238, 210, 255]);
const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);
const MARKER: Rgba<u8> = Rgba([40, 40, 40, 255]);

const BOARD_X: u32 = 40;
const BOARD_Y: u32 = 40;
const BOARD_SIDE: u32 = 480;
const CELL: u32 = BOARD_SIDE / 8;

const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR";
const AFTER_E4_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR";

fn piece_index(code: char) -> usize {
    PIECE_NAMES.iter().position(|&(_, c)| c == code).unwrap()
}

/// Each piece kind gets a dark disk with its own radius and center, a
/// marker that survives the slight rescale the edge inset causes.
fn paint_piece(frame: &mut RgbaImage, cell_x: u32, cell_y: u32, index: usize) {
    let radius = 4.0 + 1.6 * index as f32;
    let cx = CELL as f32 / 2.0 + ((index % 3) as f32 - 1.0) * 8.0;
    let cy = CELL as f32 / 2.0 + (((index / 3) % 3) as f32 - 1.0) * 8.0;
    for dy in 0..CELL {
        for dx in 0..CELL {
            let dist = ((dx as f32 - cx).powi(2) + (dy as f32 - cy).powi(2)).sqrt();
            if dist < radius {
                frame.put_pixel(cell_x + dx, cell_y + dy, MARKER);
            }
        }
    }
}

/// Renders a canonical placement as a white-on-bottom board on a gray
/// desktop.
fn paint_frame(placement: &str) -> RgbaImage {
    let grid = parse_canonical(placement).expect("test placement must parse");
    let mut frame = RgbaImage::from_pixel(640, 560, GRAY);
    for row in 0..8u32 {
        for col in 0..8u32 {
            let color = if (row + col) % 2 == 0 { BEIGE } else { GREEN };
            let x = BOARD_X + col * CELL;
            let y = BOARD_Y + row * CELL;
            for dy in 0..CELL {
                for dx in 0..CELL {
                    frame.put_pixel(x + dx, y + dy, color);
                }
            }
            if let Some(code) = grid[row as usize][col as usize] {
                paint_piece(&mut frame, x, y, piece_index(code));
            }
        }
    }
    frame
}

fn temp_template_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kibitzer-it-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn cand(mv: &str, eval_cp: i32) -> EngineCandidate {
    EngineCandidate {
        mv: mv.to_string(),
        eval_cp,
    }
}

#[test]
fn full_pipeline_from_calibration_to_suggestion() {
    let dir = temp_template_dir("full");
    let store = TemplateStore::load(&dir).unwrap();
    assert!(store.is_empty());

    let mut session = ScanSession::new(Color::White, store, MIN_BOARD_AREA, 5);
    let start_frame = paint_frame(STARTING_PLACEMENT);

    // Tick 1: board found, empty store, auto-calibration kicks in. The
    // starting position exposes 20 (piece, background) pairs.
    match session.process_frame(&start_frame) {
        TickAction::Calibrated(saved) => assert_eq!(saved, 20),
        other => panic!("expected calibration, got {:?}", other),
    }
    assert_eq!(session.template_count(), 20);

    // Ticks 2-3: the starting position debounces, then gets accepted
    // with white (us) to move.
    assert_eq!(
        session.process_frame(&start_frame),
        TickAction::NoStableChange
    );
    let action = session.process_frame(&start_frame);
    let TickAction::QueryEngine { position, fen } = action else {
        panic!("expected an engine query, got {:?}", action);
    };
    assert_eq!(position, STARTING_PLACEMENT);
    assert_eq!(
        fen,
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
    );
    assert_eq!(GamePhase::from_piece_count(32), GamePhase::Opening);

    // A result for some other position is stale and must be dropped.
    let candidates = vec![cand("e2e4", 30), cand("d2d4", -970), cand("a2a3", -990)];
    assert!(
        session
            .apply_candidates("8/8/8/8/8/8/8/8", &candidates)
            .is_none()
    );

    // The real result yields a suggestion; the huge gap to the runners-up
    // makes the top move all but certain.
    let suggestion = session
        .apply_candidates(&position, &candidates)
        .expect("expected a suggestion");
    assert_eq!(suggestion.mv, "e2e4");
    assert!(suggestion.is_best);
    // e2 sits at cell (6, 4), e4 at (4, 4); allow for the few pixels the
    // morphological pass may shift the located geometry.
    let (from, to) = suggestion.rects.expect("rects for a located board");
    let near = |a: i32, b: i32| (a - b).abs() <= 13;
    assert!(near(from.x, 280) && near(from.y, 400), "from = {:?}", from);
    assert!(near(to.x, 280) && near(to.y, 280), "to = {:?}", to);
    assert!(from.w.abs_diff(CELL) <= 4 && from.h.abs_diff(CELL) <= 4);

    // We play the move on the site; the tracker flips the turn to the
    // opponent once the new position stabilizes.
    let e4_frame = paint_frame(AFTER_E4);
    assert_eq!(session.process_frame(&e4_frame), TickAction::NoStableChange);
    assert_eq!(session.process_frame(&e4_frame), TickAction::OpponentTurn);

    // The opponent answers; the next stable position is ours again.
    let e5_frame = paint_frame(AFTER_E4_E5);
    assert_eq!(session.process_frame(&e5_frame), TickAction::NoStableChange);
    let action = session.process_frame(&e5_frame);
    let TickAction::QueryEngine { position, .. } = action else {
        panic!("expected an engine query, got {:?}", action);
    };
    assert_eq!(position, AFTER_E4_E5);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn empty_desktop_reports_board_not_found() {
    let dir = temp_template_dir("nodesk");
    let store = TemplateStore::load(&dir).unwrap();
    let mut session = ScanSession::new(Color::White, store, MIN_BOARD_AREA, 5);
    let frame = RgbaImage::from_pixel(640, 480, GRAY);
    assert_eq!(session.process_frame(&frame), TickAction::BoardNotFound);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn fallback_move_maps_to_rects_without_bookkeeping() {
    let dir = temp_template_dir("fallback");
    let store = TemplateStore::load(&dir).unwrap();
    let mut session = ScanSession::new(Color::White, store, MIN_BOARD_AREA, 5);
    let start_frame = paint_frame(STARTING_PLACEMENT);

    assert!(matches!(
        session.process_frame(&start_frame),
        TickAction::Calibrated(_)
    ));
    session.process_frame(&start_frame);
    let action = session.process_frame(&start_frame);
    let TickAction::QueryEngine { position, .. } = action else {
        panic!("expected an engine query, got {:?}", action);
    };

    let suggestion = session
        .apply_fallback(&position, Some("g1f3".to_string()))
        .expect("fallback should map");
    assert_eq!(suggestion.mv, "g1f3");
    assert_eq!(session.stats().total_moves, 0);

    // Checkmate/stalemate: no move at all.
    assert!(session.apply_fallback(&position, None).is_none());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reset_starts_a_fresh_game() {
    let dir = temp_template_dir("reset");
    let store = TemplateStore::load(&dir).unwrap();
    let mut session = ScanSession::new(Color::White, store, MIN_BOARD_AREA, 5);
    let start_frame = paint_frame(STARTING_PLACEMENT);

    session.process_frame(&start_frame);
    session.process_frame(&start_frame);
    session.process_frame(&start_frame);

    session.reset(Color::Black);
    assert_eq!(session.player_color(), Color::Black);
    assert_eq!(session.stats().total_moves, 0);

    // The starting position is re-accepted with white to move, which is
    // now the opponent.
    assert_eq!(
        session.process_frame(&start_frame),
        TickAction::NoStableChange
    );
    assert_eq!(session.process_frame(&start_frame), TickAction::OpponentTurn);
    let _ = std::fs::remove_dir_all(&dir);
}
