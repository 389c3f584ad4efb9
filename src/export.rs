use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, RgbaImage};
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::{Bytes, DynImage, ImageEXIF};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::draw_text::flatten_on_white;
use crate::error::AppError;
use crate::settings::ExportSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputFormat {
    #[default]
    #[serde(alias = "JPG", alias = "jpeg", alias = "jpg")]
    Jpeg,
    #[serde(alias = "png")]
    Png,
    #[serde(alias = "bmp")]
    Bmp,
    #[serde(alias = "TIF", alias = "tiff", alias = "tif")]
    Tiff,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::Png => "PNG",
            OutputFormat::Bmp => "BMP",
            OutputFormat::Tiff => "TIFF",
        }
    }

    /// File extension without the dot. JPEG uses `jpg`, the rest their lower-cased name.
    pub fn extension(&self) -> String {
        match self {
            OutputFormat::Jpeg => "jpg".to_string(),
            other => other.name().to_lowercase(),
        }
    }

    pub fn supports_alpha(&self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }

    pub fn is_lossy(&self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }

    fn image_format(&self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Bmp => image::ImageFormat::Bmp,
            OutputFormat::Tiff => image::ImageFormat::Tiff,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JPEG" | "JPG" => Ok(OutputFormat::Jpeg),
            "PNG" => Ok(OutputFormat::Png),
            "BMP" => Ok(OutputFormat::Bmp),
            "TIFF" | "TIF" => Ok(OutputFormat::Tiff),
            _ => Err(AppError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamingRule {
    #[default]
    Original,
    Prefix,
    Suffix,
}

pub fn is_image_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        return false;
    };
    matches!(
        ext.to_lowercase().as_str(),
        "jpg" | "jpeg" | "png" | "tif" | "tiff" | "bmp"
    )
}

/// Output path for `source`: the stem is kept, prefixed or suffixed according to
/// `rule`, and the extension always comes from `format`.
pub fn plan_output_path(
    source: &Path,
    rule: NamingRule,
    prefix: &str,
    suffix: &str,
    destination: &Path,
    format: OutputFormat,
) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let stem = match rule {
        NamingRule::Original => stem,
        NamingRule::Prefix => format!("{prefix}{stem}"),
        NamingRule::Suffix => format!("{stem}{suffix}"),
    };
    destination.join(format!("{stem}.{}", format.extension()))
}

/// Plans output paths for one export configuration.
#[derive(Debug, Clone)]
pub struct OutputPathPlanner<'a> {
    spec: &'a ExportSpec,
}

impl<'a> OutputPathPlanner<'a> {
    pub fn new(spec: &'a ExportSpec) -> Self {
        Self { spec }
    }

    pub fn plan(&self, source: &Path) -> PathBuf {
        plan_output_path(
            source,
            self.spec.naming,
            &self.spec.prefix,
            &self.spec.suffix,
            &self.spec.destination,
            self.spec.format,
        )
    }

    /// Creates the destination directory and its parents if they are missing.
    pub fn prepare(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.spec.destination).map_err(|source| AppError::ImageWrite {
            path: self.spec.destination.clone(),
            source,
        })
    }
}

fn encode_error(format: OutputFormat, e: ImageError) -> AppError {
    match e {
        ImageError::Unsupported(detail) => {
            AppError::UnsupportedFormat(format!("{format}: {detail}"))
        }
        other => AppError::Image(other),
    }
}

/// Encodes `image` in `format`. Formats without alpha are flattened onto white
/// first; `quality` only applies to lossy formats.
pub fn encode(image: &RgbaImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>, AppError> {
    let mut buf = Vec::new();
    if format.supports_alpha() {
        image
            .write_to(&mut Cursor::new(&mut buf), format.image_format())
            .map_err(|e| encode_error(format, e))?;
        return Ok(buf);
    }

    let flat = flatten_on_white(image);
    if format.is_lossy() {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder.encode_image(&flat).map_err(|e| encode_error(format, e))?;
    } else {
        flat.write_to(&mut Cursor::new(&mut buf), format.image_format())
            .map_err(|e| encode_error(format, e))?;
    }
    Ok(buf)
}

fn read_exif(source: &Path) -> Option<Bytes> {
    let bytes = fs::read(source).ok()?;
    match DynImage::from_bytes(Bytes::from(bytes)) {
        Ok(Some(image)) => image.exif(),
        Ok(None) => None,
        Err(e) => {
            debug!("{e}. Could not parse the container of {source:?}");
            None
        }
    }
}

/// Copies the EXIF block of `source` into the encoded output. Containers that
/// cannot carry EXIF, or sources without any, leave `encoded` untouched.
fn carry_exif(source: &Path, encoded: Vec<u8>, format: OutputFormat) -> Vec<u8> {
    if !matches!(format, OutputFormat::Jpeg | OutputFormat::Png) {
        return encoded;
    }
    let Some(exif) = read_exif(source) else {
        return encoded;
    };
    let out = Bytes::from(encoded.clone());
    let rewritten = match format {
        OutputFormat::Jpeg => Jpeg::from_bytes(out).map(|mut jpeg| {
            jpeg.set_exif(Some(exif));
            jpeg.encoder().bytes()
        }),
        _ => Png::from_bytes(out).map(|mut png| {
            png.set_exif(Some(exif));
            png.encoder().bytes()
        }),
    };
    match rewritten {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!("{e}. Could not copy metadata of {source:?}, writing without it.");
            encoded
        }
    }
}

/// Encodes `image` per `spec` and writes it to `out_path`.
pub fn write_image(
    image: &RgbaImage,
    source: &Path,
    out_path: &Path,
    spec: &ExportSpec,
) -> Result<(), AppError> {
    let mut encoded = encode(image, spec.format, spec.quality)?;
    if spec.preserve_metadata {
        encoded = carry_exif(source, encoded, spec.format);
    }
    fs::write(out_path, &encoded).map_err(|source| AppError::ImageWrite {
        path: out_path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn suffix_rule_replaces_the_extension() {
        let out = plan_output_path(
            Path::new("/a/photo.heic"),
            NamingRule::Suffix,
            "wm_",
            "_wm",
            Path::new("/out"),
            OutputFormat::Jpeg,
        );
        assert_eq!(out, PathBuf::from("/out/photo_wm.jpg"));
    }

    #[test]
    fn prefix_and_original_rules() {
        let src = Path::new("/pics/IMG_0001.JPG");
        let dest = Path::new("/out");
        assert_eq!(
            plan_output_path(src, NamingRule::Prefix, "wm_", "", dest, OutputFormat::Png),
            PathBuf::from("/out/wm_IMG_0001.png")
        );
        assert_eq!(
            plan_output_path(src, NamingRule::Original, "wm_", "_x", dest, OutputFormat::Tiff),
            PathBuf::from("/out/IMG_0001.tiff")
        );
    }

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("Tiff".parse::<OutputFormat>().unwrap(), OutputFormat::Tiff);
        assert!(matches!(
            "webp".parse::<OutputFormat>(),
            Err(AppError::UnsupportedFormat(_))
        ));
        assert_eq!(OutputFormat::Bmp.extension(), "bmp");
    }

    #[test]
    fn prepare_creates_nested_destination() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ExportSpec {
            destination: dir.path().join("a").join("b"),
            ..ExportSpec::default()
        };
        OutputPathPlanner::new(&spec).prepare().unwrap();
        assert!(spec.destination.is_dir());
    }

    #[test]
    fn jpeg_output_is_flattened_onto_white() {
        let transparent = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        let bytes = encode(&transparent, OutputFormat::Jpeg, 100).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c > 245)));
    }

    #[test]
    fn png_output_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 255]));
        img.put_pixel(1, 1, Rgba([200, 100, 50, 77]));
        let bytes = encode(&img, OutputFormat::Png, 1).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn unwritable_destination_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ExportSpec {
            format: OutputFormat::Png,
            ..ExportSpec::default()
        };
        let img = RgbaImage::new(2, 2);
        let out = dir.path().join("missing/out.png");
        let err = write_image(&img, Path::new("in.png"), &out, &spec).unwrap_err();
        assert!(matches!(err, AppError::ImageWrite { .. }));
    }

    #[test]
    fn supported_inputs() {
        assert!(is_image_file(Path::new("a/B.JPEG")));
        assert!(is_image_file(Path::new("scan.tif")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }
}
