use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, RgbaImage};
use tracing::debug;

use crate::color;
use crate::draw_text::{composite_mask, render_text_mask};
use crate::error::AppError;
use crate::fonts::{FontProvider, SystemFonts};
use crate::position;
use crate::settings::WatermarkSpec;

/// Draws watermark text onto copies of images.
#[derive(Clone)]
pub struct WatermarkCompositor {
    fonts: Arc<dyn FontProvider>,
}

impl Default for WatermarkCompositor {
    fn default() -> Self {
        Self::new(Arc::new(SystemFonts::default()))
    }
}

impl WatermarkCompositor {
    pub fn new(fonts: Arc<dyn FontProvider>) -> Self {
        Self { fonts }
    }

    /// Renders `spec.text` onto a copy of `source`.
    pub fn render(&self, source: &DynamicImage, spec: &WatermarkSpec) -> RgbaImage {
        self.render_text(source, spec, &spec.text)
    }

    /// Renders `text` with the styling of `spec` onto an RGBA copy of `source`.
    /// Blank text returns the copy untouched.
    pub fn render_text(
        &self,
        source: &DynamicImage,
        spec: &WatermarkSpec,
        text: &str,
    ) -> RgbaImage {
        let mut canvas = source.to_rgba8();
        if text.trim().is_empty() {
            return canvas;
        }

        let font = self.fonts.load(&spec.font);
        let mask = render_text_mask(&font, text);
        if mask.width() == 0 || mask.height() == 0 {
            return canvas;
        }

        let (x, y) = position::resolve(
            canvas.dimensions(),
            mask.dimensions(),
            spec.anchor,
            spec.margin,
            spec.custom_position,
        );
        if spec.rotation != 0.0 {
            debug!("Rotation of {} degrees is not applied", spec.rotation);
        }

        let shadow = &spec.shadow;
        if shadow.enabled {
            let shadow_color = color::resolve(&shadow.color, shadow.opacity);
            let (ox, oy) = shadow.offset;
            let (sx, sy) = (x + i64::from(ox), y + i64::from(oy));
            composite_mask(&mut canvas, &mask, sx, sy, shadow_color);
        }

        let stroke = &spec.stroke;
        if stroke.enabled && stroke.width > 0 {
            // Outline approximated by overdrawing the text at every surrounding offset.
            let stroke_color = color::resolve(&stroke.color, 100);
            let w = i64::from(stroke.width);
            for dx in -w..=w {
                for dy in -w..=w {
                    if dx != 0 || dy != 0 {
                        composite_mask(&mut canvas, &mask, x + dx, y + dy, stroke_color);
                    }
                }
            }
        }

        composite_mask(&mut canvas, &mask, x, y, color::resolve(&spec.color, spec.opacity));
        canvas
    }

    /// Decodes `path` and renders `text` onto it.
    pub fn render_file(
        &self,
        path: &Path,
        spec: &WatermarkSpec,
        text: &str,
    ) -> Result<RgbaImage, AppError> {
        let source = image::open(path).map_err(|source| AppError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.render_text(&source, spec, text))
    }

    /// Watermarked image for display, without writing anything.
    pub fn preview(&self, path: &Path, spec: &WatermarkSpec) -> Result<RgbaImage, AppError> {
        self.render_file(path, spec, &spec.text)
    }
}
