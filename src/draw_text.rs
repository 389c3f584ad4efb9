use ab_glyph::PxScale;
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::fonts::{FontHandle, GLYPH_HEIGHT, GLYPH_WIDTH, Typeface, builtin_glyph};

const INK: Luma<u8> = Luma([255]);

/// Line spacing: 120% of font size
fn line_step(size: f32) -> u32 {
    (size * 1.2).round().max(1.0) as u32
}

/// Render `text` (one entry per `\n` separated line) into a coverage mask cropped
/// to the bounding box of its ink. Text without any ink gives an empty mask.
pub fn render_text_mask(font: &FontHandle, text: &str) -> GrayImage {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return GrayImage::new(0, 0);
    }
    let tmp = match &font.typeface {
        Typeface::Outline(face) => draw_outline_lines(face, font.size, &lines),
        Typeface::Builtin => draw_builtin_lines(font.size, &lines),
    };
    crop_to_ink(&tmp)
}

fn draw_outline_lines(face: &ab_glyph::FontArc, size: f32, lines: &[&str]) -> GrayImage {
    let scale = PxScale::from(size.max(1.0));
    let step = line_step(size);
    // Glyphs may overhang their advance box, so leave room on every side.
    let pad = (size / 2.0).ceil() as u32 + 1;

    let (mut max_w, mut max_h) = (0u32, 0u32);
    for line in lines {
        let (w, h) = text_size(scale, face, line);
        max_w = max_w.max(w);
        max_h = max_h.max(h);
    }
    let tmp_w = max_w + pad * 2;
    let tmp_h = step * (lines.len() as u32 - 1) + max_h.max(step) + pad * 2;
    let mut tmp = GrayImage::new(tmp_w, tmp_h);

    for (i, line) in lines.iter().enumerate() {
        let y = pad + i as u32 * step;
        draw_text_mut(&mut tmp, INK, pad as i32, y as i32, scale, face, line);
    }
    tmp
}

fn draw_builtin_lines(size: f32, lines: &[&str]) -> GrayImage {
    // One glyph cell is 8 pixel rows tall including spacing.
    let cell = (size / 8.0).round().max(1.0) as u32;
    let advance = (GLYPH_WIDTH + 1) * cell;
    let step = (GLYPH_HEIGHT + 2) * cell;

    let longest = lines.iter().map(|l| l.chars().count() as u32).max().unwrap_or(0);
    let tmp_w = (longest * advance).max(1);
    let tmp_h = step * lines.len() as u32;
    let mut tmp = GrayImage::new(tmp_w, tmp_h);

    for (row, line) in lines.iter().enumerate() {
        let top = row as u32 * step;
        for (col, c) in line.chars().enumerate() {
            let left = col as u32 * advance;
            for (gx, bits) in builtin_glyph(c).into_iter().enumerate() {
                for gy in 0..GLYPH_HEIGHT {
                    if bits & (1 << gy) == 0 {
                        continue;
                    }
                    let px = left + gx as u32 * cell;
                    let py = top + gy * cell;
                    for y in py..py + cell {
                        for x in px..px + cell {
                            tmp.put_pixel(x, y, INK);
                        }
                    }
                }
            }
        }
    }
    tmp
}

/// Bounding box `(x, y, w, h)` of the non-zero pixels of `mask`.
pub fn ink_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = mask.width();
    let mut min_y = mask.height();
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;

    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] != 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

fn crop_to_ink(tmp: &GrayImage) -> GrayImage {
    match ink_bounds(tmp) {
        Some((x, y, w, h)) => imageops::crop_imm(tmp, x, y, w, h).to_image(),
        None => GrayImage::new(0, 0),
    }
}

/// Blend `color` through the coverage `mask` onto `dst` with its top-left at
/// `(x, y)`, using straight-alpha source-over. Parts outside `dst` are clipped.
pub fn composite_mask(dst: &mut RgbaImage, mask: &GrayImage, x: i64, y: i64, color: Rgba<u8>) {
    if color[3] == 0 {
        return;
    }
    let color_a = color[3] as f32 / 255.0;
    let (dst_w, dst_h) = (i64::from(dst.width()), i64::from(dst.height()));

    for (mx, my, coverage) in mask.enumerate_pixels() {
        if coverage[0] == 0 {
            continue;
        }
        let dx = x + i64::from(mx);
        let dy = y + i64::from(my);
        if dx < 0 || dy < 0 || dx >= dst_w || dy >= dst_h {
            continue;
        }

        let sa = color_a * (coverage[0] as f32 / 255.0);
        let dp = dst.get_pixel_mut(dx as u32, dy as u32);
        let da = dp[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            continue;
        }

        for c in 0..3 {
            let v = (color[c] as f32 * sa + dp[c] as f32 * da * (1.0 - sa)) / out_a;
            dp[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        dp[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// Drop the alpha channel by compositing onto an opaque white background.
pub fn flatten_on_white(src: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(src.width(), src.height(), |x, y| {
        let p = src.get_pixel(x, y);
        let a = p[3] as f32 / 255.0;
        let mix = |c: u8| (c as f32 * a + 255.0 * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
        Rgb([mix(p[0]), mix(p[1]), mix(p[2])])
    })
}
