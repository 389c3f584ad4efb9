use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ab_glyph::FontArc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;

/// Requested typeface for the watermark text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontSpec {
    pub family: String,
    /// Pixel height of a line of text.
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: "Arial".to_string(),
            size: 36.0,
            bold: false,
            italic: false,
        }
    }
}

#[derive(Clone)]
pub enum Typeface {
    Outline(FontArc),
    /// The bundled 5x7 bitmap glyphs, used when no font file could be loaded.
    Builtin,
}

#[derive(Clone)]
pub struct FontHandle {
    pub typeface: Typeface,
    pub size: f32,
}

impl FontHandle {
    pub fn builtin(size: f32) -> Self {
        Self {
            typeface: Typeface::Builtin,
            size,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.typeface, Typeface::Builtin)
    }
}

pub trait FontProvider: Send + Sync {
    /// Never fails: a missing font degrades to a default typeface.
    fn load(&self, spec: &FontSpec) -> FontHandle;
}

/// Always hands out the built-in glyphs. Output does not depend on the fonts
/// installed on the machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFonts;

impl FontProvider for BuiltinFonts {
    fn load(&self, spec: &FontSpec) -> FontHandle {
        FontHandle::builtin(spec.size)
    }
}

const FALLBACK_FILES: [&str; 6] = [
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "arial.ttf",
    "Arial.ttf",
    "simhei.ttf",
    "msyh.ttc",
];

/// Probes a short ordered list of well known font locations.
pub struct SystemFonts {
    search_dirs: Vec<PathBuf>,
    loaded: Mutex<HashMap<PathBuf, FontArc>>,
}

impl Default for SystemFonts {
    fn default() -> Self {
        Self::new(default_font_dirs())
    }
}

fn default_font_dirs() -> Vec<PathBuf> {
    [
        "C:/Windows/Fonts",
        "/usr/share/fonts/truetype/dejavu",
        "/usr/share/fonts/truetype/liberation",
        "/usr/share/fonts/TTF",
        "/usr/share/fonts/dejavu",
        "/Library/Fonts",
        "/System/Library/Fonts/Supplemental",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

/// File names to try for a family, most specific first.
fn candidate_files(spec: &FontSpec) -> Vec<String> {
    let family = spec.family.trim();
    let lower = family.to_lowercase().replace(' ', "");
    let style = match (spec.bold, spec.italic) {
        (true, true) => Some(("bi", "-BoldItalic", "BoldOblique")),
        (true, false) => Some(("bd", "-Bold", "Bold")),
        (false, true) => Some(("i", "-Italic", "Oblique")),
        (false, false) => None,
    };
    let mut files = Vec::new();
    if !lower.is_empty() {
        if let Some((win, suffix, dejavu)) = style {
            files.push(format!("{lower}{win}.ttf"));
            files.push(format!("{family}{suffix}.ttf"));
            files.push(format!("{}-{dejavu}.ttf", family.replace(' ', "")));
        }
        files.push(format!("{lower}.ttf"));
        files.push(format!("{family}.ttf"));
        files.push(format!("{}.ttf", family.replace(' ', "")));
    }
    files.extend(FALLBACK_FILES.iter().map(ToString::to_string));
    files
}

impl SystemFonts {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, path: &Path) -> Result<FontArc, AppError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(font) = loaded.get(path) {
            return Ok(font.clone());
        }
        let font = FontArc::try_from_vec(fs::read(path)?)?;
        loaded.insert(path.to_path_buf(), font.clone());
        Ok(font)
    }
}

impl FontProvider for SystemFonts {
    fn load(&self, spec: &FontSpec) -> FontHandle {
        for name in candidate_files(spec) {
            for dir in &self.search_dirs {
                let path = dir.join(&name);
                if !path.is_file() {
                    continue;
                }
                match self.open(&path) {
                    Ok(font) => {
                        debug!("Using font {path:?} for family {:?}", spec.family);
                        return FontHandle {
                            typeface: Typeface::Outline(font),
                            size: spec.size,
                        };
                    }
                    Err(e) => debug!("{e}. Could not load font {path:?}"),
                }
            }
        }
        warn!(
            "No usable font found for {:?}, falling back to the built-in glyphs",
            spec.family
        );
        FontHandle::builtin(spec.size)
    }
}

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;

/// Column bitmaps for printable ASCII, bit 0 is the top row.
const GLYPHS: [[u8; 5]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x00, 0x00, 0x5F, 0x00, 0x00], // !
    [0x00, 0x07, 0x00, 0x07, 0x00], // "
    [0x14, 0x7F, 0x14, 0x7F, 0x14], // #
    [0x24, 0x2A, 0x7F, 0x2A, 0x12], // $
    [0x23, 0x13, 0x08, 0x64, 0x62], // %
    [0x36, 0x49, 0x55, 0x22, 0x50], // &
    [0x00, 0x05, 0x03, 0x00, 0x00], // '
    [0x00, 0x1C, 0x22, 0x41, 0x00], // (
    [0x00, 0x41, 0x22, 0x1C, 0x00], // )
    [0x08, 0x2A, 0x1C, 0x2A, 0x08], // *
    [0x08, 0x08, 0x3E, 0x08, 0x08], // +
    [0x00, 0x50, 0x30, 0x00, 0x00], // ,
    [0x08, 0x08, 0x08, 0x08, 0x08], // -
    [0x00, 0x60, 0x60, 0x00, 0x00], // .
    [0x20, 0x10, 0x08, 0x04, 0x02], // /
    [0x3E, 0x51, 0x49, 0x45, 0x3E], // 0
    [0x00, 0x42, 0x7F, 0x40, 0x00], // 1
    [0x42, 0x61, 0x51, 0x49, 0x46], // 2
    [0x21, 0x41, 0x45, 0x4B, 0x31], // 3
    [0x18, 0x14, 0x12, 0x7F, 0x10], // 4
    [0x27, 0x45, 0x45, 0x45, 0x39], // 5
    [0x3C, 0x4A, 0x49, 0x49, 0x30], // 6
    [0x01, 0x71, 0x09, 0x05, 0x03], // 7
    [0x36, 0x49, 0x49, 0x49, 0x36], // 8
    [0x06, 0x49, 0x49, 0x29, 0x1E], // 9
    [0x00, 0x36, 0x36, 0x00, 0x00], // :
    [0x00, 0x56, 0x36, 0x00, 0x00], // ;
    [0x08, 0x14, 0x22, 0x41, 0x00], // <
    [0x14, 0x14, 0x14, 0x14, 0x14], // =
    [0x00, 0x41, 0x22, 0x14, 0x08], // >
    [0x02, 0x01, 0x51, 0x09, 0x06], // ?
    [0x32, 0x49, 0x79, 0x41, 0x3E], // @
    [0x7E, 0x11, 0x11, 0x11, 0x7E], // A
    [0x7F, 0x49, 0x49, 0x49, 0x36], // B
    [0x3E, 0x41, 0x41, 0x41, 0x22], // C
    [0x7F, 0x41, 0x41, 0x22, 0x1C], // D
    [0x7F, 0x49, 0x49, 0x49, 0x41], // E
    [0x7F, 0x09, 0x09, 0x09, 0x01], // F
    [0x3E, 0x41, 0x49, 0x49, 0x7A], // G
    [0x7F, 0x08, 0x08, 0x08, 0x7F], // H
    [0x00, 0x41, 0x7F, 0x41, 0x00], // I
    [0x20, 0x40, 0x41, 0x3F, 0x01], // J
    [0x7F, 0x08, 0x14, 0x22, 0x41], // K
    [0x7F, 0x40, 0x40, 0x40, 0x40], // L
    [0x7F, 0x02, 0x0C, 0x02, 0x7F], // M
    [0x7F, 0x04, 0x08, 0x10, 0x7F], // N
    [0x3E, 0x41, 0x41, 0x41, 0x3E], // O
    [0x7F, 0x09, 0x09, 0x09, 0x06], // P
    [0x3E, 0x41, 0x51, 0x21, 0x5E], // Q
    [0x7F, 0x09, 0x19, 0x29, 0x46], // R
    [0x46, 0x49, 0x49, 0x49, 0x31], // S
    [0x01, 0x01, 0x7F, 0x01, 0x01], // T
    [0x3F, 0x40, 0x40, 0x40, 0x3F], // U
    [0x1F, 0x20, 0x40, 0x20, 0x1F], // V
    [0x3F, 0x40, 0x38, 0x40, 0x3F], // W
    [0x63, 0x14, 0x08, 0x14, 0x63], // X
    [0x07, 0x08, 0x70, 0x08, 0x07], // Y
    [0x61, 0x51, 0x49, 0x45, 0x43], // Z
    [0x00, 0x7F, 0x41, 0x41, 0x00], // [
    [0x02, 0x04, 0x08, 0x10, 0x20], // \
    [0x00, 0x41, 0x41, 0x7F, 0x00], // ]
    [0x04, 0x02, 0x01, 0x02, 0x04], // ^
    [0x40, 0x40, 0x40, 0x40, 0x40], // _
    [0x00, 0x01, 0x02, 0x04, 0x00], // `
    [0x20, 0x54, 0x54, 0x54, 0x78], // a
    [0x7F, 0x48, 0x44, 0x44, 0x38], // b
    [0x38, 0x44, 0x44, 0x44, 0x20], // c
    [0x38, 0x44, 0x44, 0x48, 0x7F], // d
    [0x38, 0x54, 0x54, 0x54, 0x18], // e
    [0x08, 0x7E, 0x09, 0x01, 0x02], // f
    [0x0C, 0x52, 0x52, 0x52, 0x3E], // g
    [0x7F, 0x08, 0x04, 0x04, 0x78], // h
    [0x00, 0x44, 0x7D, 0x40, 0x00], // i
    [0x20, 0x40, 0x44, 0x3D, 0x00], // j
    [0x7F, 0x10, 0x28, 0x44, 0x00], // k
    [0x00, 0x41, 0x7F, 0x40, 0x00], // l
    [0x7C, 0x04, 0x18, 0x04, 0x78], // m
    [0x7C, 0x08, 0x04, 0x04, 0x78], // n
    [0x38, 0x44, 0x44, 0x44, 0x38], // o
    [0x7C, 0x14, 0x14, 0x14, 0x08], // p
    [0x08, 0x14, 0x14, 0x18, 0x7C], // q
    [0x7C, 0x08, 0x04, 0x04, 0x08], // r
    [0x48, 0x54, 0x54, 0x54, 0x20], // s
    [0x04, 0x3F, 0x44, 0x40, 0x20], // t
    [0x3C, 0x40, 0x40, 0x20, 0x7C], // u
    [0x1C, 0x20, 0x40, 0x20, 0x1C], // v
    [0x3C, 0x40, 0x30, 0x40, 0x3C], // w
    [0x44, 0x28, 0x10, 0x28, 0x44], // x
    [0x0C, 0x50, 0x50, 0x50, 0x3C], // y
    [0x44, 0x64, 0x54, 0x4C, 0x44], // z
    [0x00, 0x08, 0x36, 0x41, 0x00], // {
    [0x00, 0x00, 0x7F, 0x00, 0x00], // |
    [0x00, 0x41, 0x36, 0x08, 0x00], // }
    [0x08, 0x04, 0x08, 0x10, 0x08], // ~
];

/// Columns of the built-in glyph for `c`. Characters outside printable ASCII render as `?`.
pub fn builtin_glyph(c: char) -> [u8; 5] {
    let index = match c {
        ' '..='~' => c as usize - ' ' as usize,
        _ => '?' as usize - ' ' as usize,
    };
    GLYPHS[index]
}
