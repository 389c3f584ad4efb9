use serde::{Deserialize, Serialize};

/// Default distance in pixels between the text and the canvas edges.
pub const DEFAULT_MARGIN: i32 = 20;

/// Where on the canvas the watermark text is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
}

#[derive(Clone, Copy)]
enum Align {
    Start,
    Middle,
    End,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::CenterLeft,
        Anchor::Center,
        Anchor::CenterRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];

    /// Parses an anchor name. Unknown names fall back to [`Anchor::BottomRight`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Anchor::TopLeft,
            "top-center" => Anchor::TopCenter,
            "top-right" => Anchor::TopRight,
            "center-left" => Anchor::CenterLeft,
            "center" => Anchor::Center,
            "center-right" => Anchor::CenterRight,
            "bottom-left" => Anchor::BottomLeft,
            "bottom-center" => Anchor::BottomCenter,
            "bottom-right" => Anchor::BottomRight,
            other => {
                tracing::debug!("Unknown anchor {other:?}, using bottom-right");
                Anchor::BottomRight
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Anchor::TopLeft => "top-left",
            Anchor::TopCenter => "top-center",
            Anchor::TopRight => "top-right",
            Anchor::CenterLeft => "center-left",
            Anchor::Center => "center",
            Anchor::CenterRight => "center-right",
            Anchor::BottomLeft => "bottom-left",
            Anchor::BottomCenter => "bottom-center",
            Anchor::BottomRight => "bottom-right",
        }
    }

    fn alignment(&self) -> (Align, Align) {
        match self {
            Anchor::TopLeft => (Align::Start, Align::Start),
            Anchor::TopCenter => (Align::Middle, Align::Start),
            Anchor::TopRight => (Align::End, Align::Start),
            Anchor::CenterLeft => (Align::Start, Align::Middle),
            Anchor::Center => (Align::Middle, Align::Middle),
            Anchor::CenterRight => (Align::End, Align::Middle),
            Anchor::BottomLeft => (Align::Start, Align::End),
            Anchor::BottomCenter => (Align::Middle, Align::End),
            Anchor::BottomRight => (Align::End, Align::End),
        }
    }
}

impl From<String> for Anchor {
    fn from(name: String) -> Self {
        Anchor::from_name(&name)
    }
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn offset(align: Align, canvas: i64, text: i64, margin: i64) -> i64 {
    match align {
        Align::Start => margin,
        // Floor division, so an oversized text still lands left of / above centre.
        Align::Middle => (canvas - text).div_euclid(2),
        Align::End => canvas - text - margin,
    }
}

/// Top-left pixel at which text of `text_size` is drawn on a canvas of
/// `canvas_size` for the given anchor. The result is negative when the text
/// does not fit; the renderer clips it.
pub fn compute(
    canvas_size: (u32, u32),
    text_size: (u32, u32),
    anchor: Anchor,
    margin: i32,
) -> (i64, i64) {
    let (horizontal, vertical) = anchor.alignment();
    let margin = i64::from(margin);
    (
        offset(horizontal, canvas_size.0.into(), text_size.0.into(), margin),
        offset(vertical, canvas_size.1.into(), text_size.1.into(), margin),
    )
}

/// Resolves the final text position: an explicit coordinate wins over the anchor.
pub fn resolve(
    canvas_size: (u32, u32),
    text_size: (u32, u32),
    anchor: Anchor,
    margin: i32,
    custom: Option<(i32, i32)>,
) -> (i64, i64) {
    match custom {
        Some((x, y)) => (x.into(), y.into()),
        None => compute(canvas_size, text_size, anchor, margin),
    }
}
