use std::sync::LazyLock;

use image::Rgba;
use regex::Regex;
use tracing::warn;

static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})$")
        .expect("valid hex colour pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedColor {
    White,
    Black,
    Red,
    Blue,
    Green,
    Yellow,
}

impl NamedColor {
    pub fn rgb(&self) -> [u8; 3] {
        match self {
            NamedColor::White => [255, 255, 255],
            NamedColor::Black => [0, 0, 0],
            NamedColor::Red => [255, 0, 0],
            NamedColor::Blue => [0, 0, 255],
            NamedColor::Green => [0, 255, 0],
            NamedColor::Yellow => [255, 255, 0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpec {
    Hex([u8; 3]),
    Named(NamedColor),
}

impl ColorSpec {
    /// Parses `#RRGGBB` or a colour name. Anything unrecognised is white.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.starts_with('#') {
            let Some(c) = HEX_COLOR.captures(spec) else {
                warn!("Malformed hex colour {spec:?}, using white");
                return ColorSpec::Named(NamedColor::White);
            };
            let channel = |i: usize| u8::from_str_radix(&c[i], 16).unwrap_or(255);
            return ColorSpec::Hex([channel(1), channel(2), channel(3)]);
        }
        let named = match spec.to_ascii_lowercase().as_str() {
            "white" => NamedColor::White,
            "black" => NamedColor::Black,
            "red" => NamedColor::Red,
            "blue" => NamedColor::Blue,
            "green" => NamedColor::Green,
            "yellow" => NamedColor::Yellow,
            _ => NamedColor::White,
        };
        ColorSpec::Named(named)
    }

    pub fn rgb(&self) -> [u8; 3] {
        match self {
            ColorSpec::Hex(rgb) => *rgb,
            ColorSpec::Named(named) => named.rgb(),
        }
    }
}

/// Alpha for an opacity percentage, clamped to 0..=100 and rounded half away from zero.
pub fn opacity_to_alpha(opacity_percent: i32) -> u8 {
    let opacity = opacity_percent.clamp(0, 100) as f32;
    (255.0 * opacity / 100.0).round() as u8
}

/// Straight-alpha RGBA for a colour spec at the given opacity.
pub fn resolve(color_spec: &str, opacity_percent: i32) -> Rgba<u8> {
    let [r, g, b] = ColorSpec::parse(color_spec).rgb();
    Rgba([r, g, b, opacity_to_alpha(opacity_percent)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_red_at_full_opacity() {
        assert_eq!(resolve("#FF0000", 100), Rgba([255, 0, 0, 255]));
        assert_eq!(resolve("#0a0B0c", 100), Rgba([10, 11, 12, 255]));
    }

    #[test]
    fn half_opacity_rounds_up() {
        assert_eq!(resolve("red", 50), Rgba([255, 0, 0, 128]));
    }

    #[test]
    fn alpha_follows_rounded_percentage() {
        for o in 0..=100 {
            let want = (255.0 * o as f64 / 100.0).round() as u8;
            assert_eq!(opacity_to_alpha(o), want, "opacity {o}");
        }
    }

    #[test]
    fn opacity_is_clamped() {
        assert_eq!(opacity_to_alpha(-20), 0);
        assert_eq!(opacity_to_alpha(250), 255);
    }

    #[test]
    fn named_colours_and_defaults() {
        assert_eq!(resolve("Yellow", 100), Rgba([255, 255, 0, 255]));
        assert_eq!(resolve("BLUE", 0), Rgba([0, 0, 255, 0]));
        assert_eq!(resolve("mauve", 100), Rgba([255, 255, 255, 255]));
        assert_eq!(ColorSpec::parse("#12"), ColorSpec::Named(NamedColor::White));
        assert_eq!(ColorSpec::parse("#GGHHII"), ColorSpec::Named(NamedColor::White));
    }
}
