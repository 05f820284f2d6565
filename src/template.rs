//! Piece template store and auto-calibration.
//! Templates live as PNGs under `templates/{site}/`, one per piece kind
//! and background variant, and are bulk-loaded into an owned store. A
//! reload builds the replacement set fully before swapping it in, so the
//! classifier never sees a partially-updated set.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use tracing::{debug, info};

use crate::board::BoardGeometry;
use crate::error::{Error, Result};

/// Canonical template side in pixels; cells are resized to match before
/// scoring.
pub const TEMPLATE_SIZE: u32 = 80;

/// Which square color the template was captured on. Calibration saves one
/// template per variant seen; hand-made template sets may carry a single
/// unsuffixed image per piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackgroundVariant {
    Light,
    Dark,
    Plain,
}

impl BackgroundVariant {
    fn file_suffix(self) -> &'static str {
        match self {
            BackgroundVariant::Light => "_light",
            BackgroundVariant::Dark => "_dark",
            BackgroundVariant::Plain => "",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PieceTemplate {
    pub code: char,
    pub variant: BackgroundVariant,
    pub image: GrayImage,
}

/// Base piece names and their FEN letters, as used in template file names.
pub const PIECE_NAMES: [(&str, char); 12] = [
    ("white_king", 'K'),
    ("white_queen", 'Q'),
    ("white_rook", 'R'),
    ("white_bishop", 'B'),
    ("white_knight", 'N'),
    ("white_pawn", 'P'),
    ("black_king", 'k'),
    ("black_queen", 'q'),
    ("black_rook", 'r'),
    ("black_bishop", 'b'),
    ("black_knight", 'n'),
    ("black_pawn", 'p'),
];

/// Owned template set. Passed by reference into the classifier; replaced
/// atomically on reload.
#[derive(Debug, Default)]
pub struct TemplateStore {
    dir: PathBuf,
    templates: Vec<PieceTemplate>,
}

impl TemplateStore {
    /// Builds a store from an in-memory set, bypassing the filesystem.
    pub fn from_templates(templates: Vec<PieceTemplate>) -> Self {
        Self {
            dir: PathBuf::new(),
            templates,
        }
    }

    /// Loads all templates under `dir`. A missing directory yields an
    /// empty store ("awaiting calibration"), not an error.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            dir: dir.into(),
            templates: Vec::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-reads the template directory. The new set is built completely
    /// before replacing the old one.
    pub fn reload(&mut self) -> Result<usize> {
        let fresh = load_dir(&self.dir)?;
        let count = fresh.len();
        self.templates = fresh;
        debug!("template store: {} templates from {:?}", count, self.dir);
        Ok(count)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PieceTemplate> {
        self.templates.iter()
    }
}

fn load_dir(dir: &Path) -> Result<Vec<PieceTemplate>> {
    let mut templates = Vec::new();
    if !dir.is_dir() {
        return Ok(templates);
    }
    let entries =
        fs::read_dir(dir).map_err(|e| Error::Template(format!("read {:?}: {}", dir, e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Template(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((code, variant)) = parse_template_name(stem) else {
            continue;
        };
        let img = image::open(&path)
            .map_err(|e| Error::Template(format!("decode {:?}: {}", path, e)))?
            .to_luma8();
        let image = imageops::resize(&img, TEMPLATE_SIZE, TEMPLATE_SIZE, FilterType::Triangle);
        templates.push(PieceTemplate {
            code,
            variant,
            image,
        });
    }
    Ok(templates)
}

fn parse_template_name(stem: &str) -> Option<(char, BackgroundVariant)> {
    let (base, variant) = if let Some(base) = stem.strip_suffix("_light") {
        (base, BackgroundVariant::Light)
    } else if let Some(base) = stem.strip_suffix("_dark") {
        (base, BackgroundVariant::Dark)
    } else {
        (stem, BackgroundVariant::Plain)
    };
    PIECE_NAMES
        .iter()
        .find(|(name, _)| *name == base)
        .map(|&(_, code)| (code, variant))
}

/// Piece layout of the standard starting position, physical screen order
/// with black at the top. Calibration only works from this position.
pub fn starting_layout() -> [[Option<&'static str>; 8]; 8] {
    let back = |color: &'static str| -> [&'static str; 8] {
        match color {
            "black" => [
                "black_rook",
                "black_knight",
                "black_bishop",
                "black_queen",
                "black_king",
                "black_bishop",
                "black_knight",
                "black_rook",
            ],
            _ => [
                "white_rook",
                "white_knight",
                "white_bishop",
                "white_queen",
                "white_king",
                "white_bishop",
                "white_knight",
                "white_rook",
            ],
        }
    };
    let mut layout = [[None; 8]; 8];
    layout[0] = back("black").map(Some);
    layout[1] = ["black_pawn"; 8].map(Some);
    layout[6] = ["white_pawn"; 8].map(Some);
    layout[7] = back("white").map(Some);
    layout
}

/// Extracts piece templates from a frame showing the starting position
/// and persists them under the store's directory, one per
/// `(piece, light|dark)` pair first seen. Reloads the store when anything
/// was saved. Returns the number of templates written.
pub fn auto_calibrate(
    frame: &RgbaImage,
    geometry: &BoardGeometry,
    store: &mut TemplateStore,
) -> Result<usize> {
    fs::create_dir_all(store.dir())
        .map_err(|e| Error::Template(format!("create {:?}: {}", store.dir(), e)))?;

    let layout = starting_layout();
    let mut seen: HashSet<(&str, BackgroundVariant)> = HashSet::new();
    let mut saved = 0usize;

    for row in 0..8 {
        for col in 0..8 {
            let Some(name) = layout[row][col] else {
                continue;
            };
            let variant = if (row + col) % 2 == 0 {
                BackgroundVariant::Light
            } else {
                BackgroundVariant::Dark
            };
            if !seen.insert((name, variant)) {
                continue;
            }

            let (x, y, w, h) = geometry.cell_rect(row, col);
            let Some((cx, cy, cw, ch)) = clamp_rect(x, y, w, h, frame.width(), frame.height())
            else {
                continue;
            };
            let cell = imageops::crop_imm(frame, cx, cy, cw, ch).to_image();
            let template =
                imageops::resize(&cell, TEMPLATE_SIZE, TEMPLATE_SIZE, FilterType::Triangle);

            let path = store
                .dir()
                .join(format!("{}{}.png", name, variant.file_suffix()));
            template
                .save(&path)
                .map_err(|e| Error::Template(format!("save {:?}: {}", path, e)))?;
            debug!("saved template {:?}", path);
            saved += 1;
        }
    }

    if saved > 0 {
        store.reload()?;
        info!("auto-calibrated {} piece templates", saved);
    }
    Ok(saved)
}

/// Clamps a possibly out-of-frame rectangle to image bounds. Returns
/// `None` when nothing of it remains visible.
pub fn clamp_rect(x: i32, y: i32, w: u32, h: u32, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w as i32).min(img_w as i32);
    let y1 = (y + h as i32).min(img_h as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_names_parse() {
        assert_eq!(
            parse_template_name("white_king_light"),
            Some(('K', BackgroundVariant::Light))
        );
        assert_eq!(
            parse_template_name("black_pawn_dark"),
            Some(('p', BackgroundVariant::Dark))
        );
        assert_eq!(
            parse_template_name("white_queen"),
            Some(('Q', BackgroundVariant::Plain))
        );
        assert_eq!(parse_template_name("not_a_piece"), None);
    }

    #[test]
    fn starting_layout_has_32_pieces() {
        let layout = starting_layout();
        let count = layout.iter().flatten().filter(|c| c.is_some()).count();
        assert_eq!(count, 32);
        assert_eq!(layout[0][4], Some("black_king"));
        assert_eq!(layout[7][4], Some("white_king"));
    }

    #[test]
    fn clamping_behaves_at_edges() {
        assert_eq!(clamp_rect(-10, -10, 50, 50, 100, 100), Some((0, 0, 40, 40)));
        assert_eq!(clamp_rect(90, 90, 50, 50, 100, 100), Some((90, 90, 10, 10)));
        assert_eq!(clamp_rect(200, 0, 50, 50, 100, 100), None);
        assert_eq!(clamp_rect(0, 0, 10, 10, 0, 0), None);
    }

    #[test]
    fn missing_directory_is_awaiting_calibration() {
        let store = TemplateStore::load("/nonexistent/kibitzer-templates").unwrap();
        assert!(store.is_empty());
    }
}
