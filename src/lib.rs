pub mod batch;
pub mod color;
pub mod compositor;
pub mod draw_text;
pub mod error;
pub mod export;
pub mod fonts;
pub mod parse_exif;
pub mod position;
pub mod settings;

use std::path::{Path, PathBuf};

use batch::{BatchEvent, BatchExportController, BatchJob, BatchSummary, TextSource};
use error::AppError;
use export::{NamingRule, OutputFormat};
use position::Anchor;
use settings::{ExportSpec, Settings, SettingsStore, WatermarkSpec};
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, clap::Parser)]
#[clap(about = "A command line tool to stamp capture dates or custom text onto images")]
pub struct App {
    #[arg(help = "Path to the directory containing the image files to be processed")]
    pub source: PathBuf,
    #[arg(
        short,
        long,
        help = "Directory for the watermarked images. Defaults to <source>/<source name>_watermark"
    )]
    pub output: Option<PathBuf>,
    #[arg(long, help = "Text to draw. Without it the capture date of every image is used")]
    pub text: Option<String>,
    #[arg(long)]
    pub font_family: Option<String>,
    #[arg(short = 's', long)]
    pub font_size: Option<f32>,
    #[arg(long)]
    pub bold: bool,
    #[arg(long)]
    pub italic: bool,
    #[arg(short, long, help = "white, black, red, blue, green, yellow or #RRGGBB")]
    pub color: Option<String>,
    #[arg(long, help = "Text opacity in percent")]
    pub opacity: Option<i32>,
    #[arg(
        short,
        long,
        help = "top-left, top-center, top-right, center-left, center, center-right, bottom-left, bottom-center or bottom-right"
    )]
    pub position: Option<String>,
    #[arg(long, help = "Distance from the image edges in pixels")]
    pub margin: Option<i32>,
    #[arg(long, help = "Draw a drop shadow under the text")]
    pub shadow: bool,
    #[arg(long, help = "Outline the text")]
    pub stroke: bool,
    #[arg(long)]
    pub stroke_width: Option<u32>,
    #[arg(short, long, help = "JPEG, PNG, BMP or TIFF")]
    pub format: Option<String>,
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,
    #[arg(long, value_enum)]
    pub naming: Option<NamingRule>,
    #[arg(long)]
    pub prefix: Option<String>,
    #[arg(long)]
    pub suffix: Option<String>,
    #[arg(long, help = "Do not copy the EXIF data of the originals into the output")]
    pub no_preserve_metadata: bool,
    #[arg(short, long, help = "Also process images in sub directories")]
    pub recursive: bool,
    #[arg(long, help = "Settings file to read defaults and templates from")]
    pub settings: Option<PathBuf>,
    #[arg(long, help = "Name of a saved template to start from")]
    pub template: Option<String>,
    #[arg(long, help = "Save the resulting watermark settings as a template")]
    pub save_template: Option<String>,
}

impl App {
    fn watermark_spec(&self, base: WatermarkSpec) -> WatermarkSpec {
        let mut spec = base;
        if let Some(text) = &self.text {
            spec.text = text.clone();
        }
        if let Some(family) = &self.font_family {
            spec.font.family = family.clone();
        }
        if let Some(size) = self.font_size {
            spec.font.size = size;
        }
        spec.font.bold |= self.bold;
        spec.font.italic |= self.italic;
        if let Some(color) = &self.color {
            spec.color = color.clone();
        }
        if let Some(opacity) = self.opacity {
            spec.opacity = opacity;
        }
        if let Some(position) = &self.position {
            spec.anchor = Anchor::from_name(position);
        }
        if let Some(margin) = self.margin {
            spec.margin = margin;
        }
        spec.shadow.enabled |= self.shadow;
        spec.stroke.enabled |= self.stroke;
        if let Some(width) = self.stroke_width {
            spec.stroke.width = width;
        }
        spec
    }

    fn export_spec(&self, base: ExportSpec) -> Result<ExportSpec, AppError> {
        let mut spec = base;
        if let Some(format) = &self.format {
            spec.format = format.parse::<OutputFormat>()?;
        }
        if let Some(quality) = self.quality {
            spec.quality = quality;
        }
        if let Some(naming) = self.naming {
            spec.naming = naming;
        }
        if let Some(prefix) = &self.prefix {
            spec.prefix = prefix.clone();
        }
        if let Some(suffix) = &self.suffix {
            spec.suffix = suffix.clone();
        }
        spec.preserve_metadata &= !self.no_preserve_metadata;
        spec.destination = match &self.output {
            Some(output) => output.clone(),
            None => default_output_dir(&self.source),
        };
        Ok(spec)
    }
}

fn default_output_dir(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("images");
    source.join(format!("{name}_watermark"))
}

/// Supported images under `root`, sorted, leaving out anything inside `exclude`.
pub fn collect_images(root: &Path, recursive: bool, exclude: &Path) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut images: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !p.starts_with(exclude) && export::is_image_file(p))
        .collect();
    images.sort();
    images
}

/// The watermark's own text when it has any, otherwise the capture date of each image.
fn text_source(watermark: &WatermarkSpec) -> TextSource {
    if watermark.text.trim().is_empty() {
        TextSource::CaptureDate { fallback: None }
    } else {
        TextSource::Literal(watermark.text.clone())
    }
}

fn open_settings(path: Option<&Path>) -> Result<Option<SettingsStore>, AppError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match SettingsStore::default_path() {
            Some(path) => path,
            None => return Ok(None),
        },
    };
    SettingsStore::open(path).map(Some)
}

pub fn run_watermarking(app: App) -> Result<BatchSummary, AppError> {
    let mut store = open_settings(app.settings.as_deref())?;
    let settings = store
        .as_ref()
        .map(|s| s.settings.clone())
        .unwrap_or_else(Settings::default);

    let base = match (&app.template, &store) {
        (Some(name), Some(store)) => match store.template(name) {
            Some(spec) => spec.clone(),
            None => {
                warn!("No template named {name:?}, using the saved settings");
                settings.watermark.clone()
            }
        },
        _ => settings.watermark.clone(),
    };
    let watermark = app.watermark_spec(base);
    let export = app.export_spec(settings.export.clone())?;

    if let Some(store) = store.as_mut() {
        if let Some(name) = &app.save_template {
            store.add_template(name, watermark.clone())?;
        }
        store.add_recent_directory(&app.source);
        if let Err(e) = store.save() {
            warn!("{e}. Could not save settings to {:?}", store.path());
        }
    }

    let images = collect_images(&app.source, app.recursive, &export.destination);
    info!("Found {} images in {:?}", images.len(), app.source);

    let job = BatchJob::from_paths(images, text_source(&watermark), watermark, export);
    let handle = BatchExportController::default().spawn(job)?;

    for event in handle.events.iter() {
        match event {
            BatchEvent::Started { total } => info!("Processing {total} images"),
            BatchEvent::Item {
                name,
                success: false,
                message,
            } => error!("{name}: {message}"),
            BatchEvent::Item { .. } => {}
            BatchEvent::Progress { completed, total } => info!("{completed}/{total}"),
            BatchEvent::Finished(summary) => {
                info!(
                    "Done! processed: {}, skipped: {}, failed: {}",
                    summary.succeeded, summary.skipped, summary.failed
                );
                if let Some(dir) = &summary.destination {
                    info!("Output directory: {dir:?}");
                }
            }
        }
    }

    Ok(handle.join()?.summary)
}
