use std::path::Path;
use std::sync::Arc;

use resvg::tiny_skia;
use tracing::{debug, warn};

use super::glyphs::{self, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::error::Degradation;

/// Coverage mask of a rendered text run, 0 = transparent, 255 = opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphMask {
    width: u32,
    height: u32,
    coverage: Vec<u8>,
}

impl GlyphMask {
    fn new(width: u32, height: u32, coverage: Vec<u8>) -> Self {
        debug_assert_eq!(coverage.len(), width as usize * height as usize);
        Self {
            width,
            height,
            coverage,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn coverage(&self, x: u32, y: u32) -> u8 {
        self.coverage[(y * self.width + x) as usize]
    }
}

/// Rasterizes text runs into coverage masks
///
/// Uses system fonts (plus an optional extra directory) through usvg/resvg.
/// When no font is available, or a run renders no visible glyphs, the
/// built-in 5x7 bitmap set is used instead and a `FontUnavailable`
/// degradation is reported.
#[derive(Clone)]
pub struct TextRenderer {
    fonts: Option<Arc<usvg::fontdb::Database>>,
    family: String,
}

impl TextRenderer {
    /// Load system fonts, then any fonts found in `font_dir`
    pub fn load(font_dir: Option<&Path>) -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        if let Some(dir) = font_dir {
            db.load_fonts_dir(dir);
        }
        Self::from_database(db)
    }

    pub fn from_database(db: usvg::fontdb::Database) -> Self {
        let family = db
            .faces()
            .find_map(|face| face.families.first().map(|(name, _)| name.replace('\'', "")));

        match family {
            Some(family) => {
                debug!("Loaded {} font faces, fallback family '{}'", db.len(), family);
                Self {
                    fonts: Some(Arc::new(db)),
                    family,
                }
            }
            None => {
                warn!("No fonts found, text will use the built-in glyph set");
                Self::builtin()
            }
        }
    }

    /// A renderer that only uses the built-in glyph set
    pub fn builtin() -> Self {
        Self {
            fonts: None,
            family: String::new(),
        }
    }

    /// Rasterize `text` at `size` pixels
    pub fn rasterize(&self, text: &str, size: u32) -> (GlyphMask, Option<Degradation>) {
        let size = size.max(1);

        let Some(fonts) = &self.fonts else {
            let degradation = Degradation::FontUnavailable {
                reason: "no fonts are installed".to_string(),
            };
            return (builtin_mask(text, size), Some(degradation));
        };

        match self.render_vector(fonts, text, size) {
            Ok(mask) => (mask, None),
            Err(reason) => {
                warn!("Falling back to built-in glyphs for '{}': {}", text, reason);
                (builtin_mask(text, size), Some(Degradation::FontUnavailable { reason }))
            }
        }
    }

    fn render_vector(
        &self,
        fonts: &Arc<usvg::fontdb::Database>,
        text: &str,
        size: u32,
    ) -> std::result::Result<GlyphMask, String> {
        let chars = text.chars().count() as u32;
        let canvas_w = (chars + 2) * size;
        let canvas_h = size * 2;
        let svg = format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}">"#,
                r#"<text x="{x}" y="{y}" font-family="Arial, 'DejaVu Sans', '{family}', sans-serif" "#,
                r##"font-size="{size}" fill="#ffffff" xml:space="preserve">{text}</text></svg>"##
            ),
            w = canvas_w,
            h = canvas_h,
            x = size / 2,
            y = size * 7 / 5,
            family = self.family,
            size = size,
            text = escape_xml(text),
        );

        let options = usvg::Options {
            fontdb: Arc::clone(fonts),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&svg, &options).map_err(|e| e.to_string())?;

        let mut pixmap = tiny_skia::Pixmap::new(canvas_w, canvas_h)
            .ok_or_else(|| format!("cannot allocate a {}x{} text canvas", canvas_w, canvas_h))?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        trim_to_ink(pixmap.width(), pixmap.height(), pixmap.data())
            .ok_or_else(|| "no glyphs could be rendered".to_string())
    }
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer")
            .field("faces", &self.fonts.as_ref().map(|db| db.len()))
            .field("family", &self.family)
            .finish()
    }
}

/// Crop an RGBA pixmap to the bounding box of its non-transparent pixels
fn trim_to_ink(width: u32, height: u32, rgba: &[u8]) -> Option<GlyphMask> {
    let alpha = |x: u32, y: u32| rgba[((y * width + x) * 4 + 3) as usize];

    let (mut left, mut top, mut right, mut bottom) = (u32::MAX, u32::MAX, 0, 0);
    for y in 0..height {
        for x in 0..width {
            if alpha(x, y) > 0 {
                left = left.min(x);
                top = top.min(y);
                right = right.max(x);
                bottom = bottom.max(y);
            }
        }
    }

    if left > right {
        return None;
    }

    let (w, h) = (right - left + 1, bottom - top + 1);
    let mut coverage = Vec::with_capacity((w * h) as usize);
    for y in top..=bottom {
        for x in left..=right {
            coverage.push(alpha(x, y));
        }
    }
    Some(GlyphMask::new(w, h, coverage))
}

/// Render with the 5x7 bitmap set, scaled by whole pixels
fn builtin_mask(text: &str, size: u32) -> GlyphMask {
    let scale = (size / 8).max(1);
    let advance = (GLYPH_WIDTH + 1) * scale;
    let chars: Vec<char> = text.chars().collect();

    let width = (chars.len() as u32 * advance).saturating_sub(scale).max(1);
    let height = GLYPH_HEIGHT * scale;
    let mut coverage = vec![0u8; (width * height) as usize];

    for (i, c) in chars.iter().enumerate() {
        let rows = glyphs::glyph(*c);
        let origin = i as u32 * advance;
        for gy in 0..GLYPH_HEIGHT {
            for gx in 0..GLYPH_WIDTH {
                if !glyphs::is_set(&rows, gx, gy) {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = origin + gx * scale + dx;
                        let y = gy * scale + dy;
                        coverage[(y * width + x) as usize] = 255;
                    }
                }
            }
        }
    }

    GlyphMask::new(width, height, coverage)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
