//! Square classification and position assembly.
//! Each cell is cropped from the frame, resized to the canonical template
//! size and scored against every loaded template with zero-normalized
//! cross-correlation; both background variants compete equally. The
//! assembler runs all 64 cells and derives orientation and canonical
//! notation from the result.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

use crate::board::{BoardGeometry, BoardPosition};
use crate::template::{TEMPLATE_SIZE, TemplateStore, clamp_rect};

/// Best-match score below this means the square is empty.
pub const MATCH_THRESHOLD: f32 = 0.55;

/// Edge rows and columns are cropped inward by this fraction of the cell
/// size to keep board-border pixels out of the match.
const EDGE_INSET_FRACTION: f32 = 0.04;

/// One cell's classification result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareObservation {
    pub piece: Option<char>,
    pub score: f32,
}

impl SquareObservation {
    const EMPTY: SquareObservation = SquareObservation {
        piece: None,
        score: -1.0,
    };
}

/// Identifies the piece on a single cell image, or empty.
pub fn classify_square(cell: &GrayImage, store: &TemplateStore) -> SquareObservation {
    if store.is_empty() {
        return SquareObservation::EMPTY;
    }
    let resized;
    let cell = if cell.dimensions() == (TEMPLATE_SIZE, TEMPLATE_SIZE) {
        cell
    } else {
        resized = imageops::resize(cell, TEMPLATE_SIZE, TEMPLATE_SIZE, FilterType::Triangle);
        &resized
    };

    let mut best_score = -1.0f32;
    let mut best_piece = None;
    for template in store.iter() {
        let score = ncc_score(cell, &template.image);
        if score > best_score {
            best_score = score;
            best_piece = Some(template.code);
        }
    }

    if best_score >= MATCH_THRESHOLD {
        SquareObservation {
            piece: best_piece,
            score: best_score,
        }
    } else {
        SquareObservation {
            piece: None,
            score: best_score,
        }
    }
}

/// Zero-normalized cross-correlation of two equally sized images, in
/// [-1, 1]. Mean subtraction keeps flat-colored cells from matching
/// low-contrast templates; zero variance on either side scores 0.
fn ncc_score(a: &GrayImage, b: &GrayImage) -> f32 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let n = (a.width() * a.height()) as f64;
    let mean = |img: &GrayImage| img.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let (ma, mb) = (mean(a), mean(b));

    let mut cross = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let da = pa[0] as f64 - ma;
        let db = pb[0] as f64 - mb;
        cross += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    (cross / (var_a.sqrt() * var_b.sqrt())) as f32
}

/// Runs the classifier over all 64 cells of the located board.
/// Out-of-frame or degenerate crops read as empty squares.
pub fn assemble(
    frame: &RgbaImage,
    geometry: &BoardGeometry,
    store: &TemplateStore,
) -> BoardPosition {
    let gray = imageops::grayscale(frame);
    let inset = (geometry.cell_size() * EDGE_INSET_FRACTION).round().max(1.0) as i32;

    let mut squares = [[None; 8]; 8];
    for row in 0..8 {
        for col in 0..8 {
            let (mut x, mut y, w, h) = geometry.cell_rect(row, col);
            let (mut w, mut h) = (w as i32, h as i32);
            if col == 0 {
                x += inset;
                w -= inset;
            }
            if col == 7 {
                w -= inset;
            }
            if row == 0 {
                y += inset;
                h -= inset;
            }
            if row == 7 {
                h -= inset;
            }
            if w <= 0 || h <= 0 {
                continue;
            }
            let Some((cx, cy, cw, ch)) =
                clamp_rect(x, y, w as u32, h as u32, gray.width(), gray.height())
            else {
                continue;
            };
            let cell = imageops::crop_imm(&gray, cx, cy, cw, ch).to_image();
            squares[row][col] = classify_square(&cell, store).piece;
        }
    }
    BoardPosition::new(squares)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::template::{BackgroundVariant, PieceTemplate};
    use image::Luma;

    /// Distinct low-frequency test pattern per piece: a filled disk whose
    /// radius and fill depend on the piece index, robust under the slight
    /// rescale the edge inset causes.
    pub fn test_pattern(index: usize) -> GrayImage {
        let radius = 10.0 + 3.0 * index as f32;
        let (fill, bg) = if index % 2 == 0 { (230u8, 40u8) } else { (40, 230) };
        GrayImage::from_fn(TEMPLATE_SIZE, TEMPLATE_SIZE, |x, y| {
            let dx = x as f32 - 40.0;
            let dy = y as f32 - 40.0;
            if (dx * dx + dy * dy).sqrt() < radius {
                Luma([fill])
            } else {
                Luma([bg])
            }
        })
    }

    pub fn piece_index(code: char) -> usize {
        crate::template::PIECE_NAMES
            .iter()
            .position(|&(_, c)| c == code)
            .unwrap()
    }

    pub fn test_store() -> TemplateStore {
        let templates = crate::template::PIECE_NAMES
            .iter()
            .enumerate()
            .map(|(i, &(_, code))| PieceTemplate {
                code,
                variant: BackgroundVariant::Plain,
                image: test_pattern(i),
            })
            .collect();
        TemplateStore::from_templates(templates)
    }

    #[test]
    fn identical_cell_matches_its_template() {
        let store = test_store();
        let cell = test_pattern(piece_index('K'));
        let obs = classify_square(&cell, &store);
        assert_eq!(obs.piece, Some('K'));
        assert!(obs.score >= MATCH_THRESHOLD, "score {}", obs.score);
    }

    #[test]
    fn plain_cell_is_empty() {
        let store = test_store();
        let cell = GrayImage::from_pixel(TEMPLATE_SIZE, TEMPLATE_SIZE, Luma([128]));
        let obs = classify_square(&cell, &store);
        assert_eq!(obs.piece, None);
    }

    #[test]
    fn empty_store_classifies_nothing() {
        let store = TemplateStore::from_templates(Vec::new());
        let cell = test_pattern(0);
        assert_eq!(classify_square(&cell, &store).piece, None);
    }

    #[test]
    fn ncc_is_one_on_self_and_zero_on_flat() {
        let a = test_pattern(3);
        assert!(ncc_score(&a, &a) > 0.999);
        let flat = GrayImage::from_pixel(TEMPLATE_SIZE, TEMPLATE_SIZE, Luma([77]));
        assert_eq!(ncc_score(&flat, &a), 0.0);
    }

    #[test]
    fn assembles_pieces_painted_into_a_frame() {
        let store = test_store();
        let geometry = crate::board::BoardGeometry {
            x: 10,
            y: 10,
            side: 640,
        };
        let mut frame = RgbaImage::from_pixel(700, 700, image::Rgba([128, 128, 128, 255]));

        // Inner cells only: no edge inset in play.
        let placed = [((3usize, 3usize), 'K'), ((4, 5), 'q'), ((2, 6), 'n')];
        for &((row, col), code) in &placed {
            let pattern = test_pattern(piece_index(code));
            let (x, y, _, _) = geometry.cell_rect(row, col);
            for (px, py, p) in pattern.enumerate_pixels() {
                let v = p[0];
                frame.put_pixel(
                    x as u32 + px,
                    y as u32 + py,
                    image::Rgba([v, v, v, 255]),
                );
            }
        }

        let position = assemble(&frame, &geometry, &store);
        assert_eq!(position.squares[3][3], Some('K'));
        assert_eq!(position.squares[4][5], Some('q'));
        assert_eq!(position.squares[2][6], Some('n'));
        assert_eq!(position.piece_count(), 3);
    }
}
