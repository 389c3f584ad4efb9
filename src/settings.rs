use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::export::{NamingRule, OutputFormat};
use crate::fonts::FontSpec;
use crate::position::{Anchor, DEFAULT_MARGIN};

const MAX_RECENT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSpec {
    pub enabled: bool,
    pub offset: (i32, i32),
    pub color: String,
    pub opacity: i32,
}

impl Default for ShadowSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            offset: (2, 2),
            color: "black".to_string(),
            opacity: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeSpec {
    pub enabled: bool,
    pub width: u32,
    pub color: String,
}

impl Default for StrokeSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 1,
            color: "black".to_string(),
        }
    }
}

/// How the watermark text looks and where it goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkSpec {
    pub text: String,
    pub font: FontSpec,
    /// `#RRGGBB` or a colour name.
    pub color: String,
    /// Percent, clamped to 0..=100 when used.
    pub opacity: i32,
    pub shadow: ShadowSpec,
    pub stroke: StrokeSpec,
    pub anchor: Anchor,
    /// Explicit top-left pixel; overrides `anchor` and `margin`.
    pub custom_position: Option<(i32, i32)>,
    /// Degrees. Stored but not applied when rendering.
    pub rotation: f32,
    pub margin: i32,
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            font: FontSpec::default(),
            color: "white".to_string(),
            opacity: 100,
            shadow: ShadowSpec::default(),
            stroke: StrokeSpec::default(),
            anchor: Anchor::BottomRight,
            custom_position: None,
            rotation: 0.0,
            margin: DEFAULT_MARGIN,
        }
    }
}

/// Output encoding and naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSpec {
    pub format: OutputFormat,
    /// 1..=100, only used by lossy formats.
    pub quality: u8,
    pub naming: NamingRule,
    pub prefix: String,
    pub suffix: String,
    pub destination: PathBuf,
    pub preserve_metadata: bool,
}

impl Default for ExportSpec {
    fn default() -> Self {
        let destination = directories::UserDirs::new()
            .and_then(|dirs| dirs.desktop_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            format: OutputFormat::Jpeg,
            quality: 95,
            naming: NamingRule::Original,
            prefix: "wm_".to_string(),
            suffix: "_watermarked".to_string(),
            destination,
            preserve_metadata: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub spec: WatermarkSpec,
    pub created: Timestamp,
    pub modified: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recent {
    pub directories: Vec<PathBuf>,
    pub templates: Vec<String>,
}

/// The persisted settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub watermark: WatermarkSpec,
    pub export: ExportSpec,
    pub templates: BTreeMap<String, Template>,
    pub recent: Recent,
}

fn push_recent<T: PartialEq>(list: &mut Vec<T>, item: T) {
    list.retain(|x| *x != item);
    list.insert(0, item);
    list.truncate(MAX_RECENT);
}

/// Settings document bound to the JSON file it is stored in.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    pub settings: Settings,
}

impl SettingsStore {
    /// Location in the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "photo-watermark")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Loads `path`. A missing or unparsable file gives the default settings,
    /// and keys absent from the file keep their defaults.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!("No settings at {path:?}, using defaults");
            return Ok(Self {
                path,
                settings: Settings::default(),
            });
        }
        let settings = match serde_json::from_str(&fs::read_to_string(&path)?) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{e}. Could not parse settings at {path:?}, using defaults");
                Settings::default()
            }
        };
        Ok(Self { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.settings)?)?;
        debug!("Saved settings to {:?}", self.path);
        Ok(())
    }

    /// Stores `spec` under `name`, replacing an existing template of that name.
    pub fn add_template(&mut self, name: &str, spec: WatermarkSpec) -> Result<(), AppError> {
        let now = Timestamp::now();
        let created = self
            .settings
            .templates
            .get(name)
            .map_or(now, |existing| existing.created);
        self.settings.templates.insert(
            name.to_string(),
            Template {
                spec,
                created,
                modified: now,
            },
        );
        push_recent(&mut self.settings.recent.templates, name.to_string());
        info!("Saved template {name:?}");
        self.save()
    }

    pub fn template(&self, name: &str) -> Option<&WatermarkSpec> {
        self.settings.templates.get(name).map(|t| &t.spec)
    }

    /// Returns `false` when there was no template called `name`.
    pub fn remove_template(&mut self, name: &str) -> Result<bool, AppError> {
        if self.settings.templates.remove(name).is_none() {
            return Ok(false);
        }
        self.settings.recent.templates.retain(|t| t != name);
        self.save()?;
        Ok(true)
    }

    pub fn templates(&self) -> impl Iterator<Item = (&str, &Template)> {
        self.settings.templates.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn add_recent_directory<P: Into<PathBuf>>(&mut self, dir: P) {
        push_recent(&mut self.settings.recent.directories, dir.into());
    }

    pub fn recent_directories(&self) -> &[PathBuf] {
        &self.settings.recent.directories
    }

    /// Restores the default watermark, export and recent-directory settings.
    /// Saved templates are kept.
    pub fn reset(&mut self) -> Result<(), AppError> {
        let templates = std::mem::take(&mut self.settings.templates);
        let recent_templates = std::mem::take(&mut self.settings.recent.templates);
        self.settings = Settings {
            templates,
            recent: Recent {
                templates: recent_templates,
                ..Recent::default()
            },
            ..Settings::default()
        };
        self.save()
    }

    /// Writes the whole document, templates included, to another file.
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> Result<(), AppError> {
        fs::write(path, serde_json::to_string_pretty(&self.settings)?)?;
        Ok(())
    }

    /// Replaces the settings with an exported document, merging its templates
    /// into the existing ones.
    pub fn import_from<P: AsRef<Path>>(&mut self, path: P) -> Result<(), AppError> {
        let imported: Settings = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut templates = std::mem::take(&mut self.settings.templates);
        templates.extend(imported.templates);
        self.settings = Settings { templates, ..imported };
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let spec = WatermarkSpec::default();
        assert_eq!(spec.font.size, 36.0);
        assert_eq!(spec.color, "white");
        assert_eq!(spec.opacity, 100);
        assert_eq!(spec.anchor, Anchor::BottomRight);
        assert_eq!(spec.margin, 20);
        assert_eq!(spec.shadow.offset, (2, 2));

        let export = ExportSpec::default();
        assert_eq!(export.quality, 95);
        assert_eq!(export.naming, NamingRule::Original);
        assert_eq!(export.suffix, "_watermarked");
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "watermark": { "text": "Hi", "anchor": "top-left", "font": { "size": 12 } },
                 "export": { "format": "png", "naming": "suffix" } }"#,
        )
        .unwrap();
        assert_eq!(settings.watermark.text, "Hi");
        assert_eq!(settings.watermark.anchor, Anchor::TopLeft);
        assert_eq!(settings.watermark.font.size, 12.0);
        assert_eq!(settings.watermark.font.family, "Arial");
        assert_eq!(settings.watermark.color, "white");
        assert_eq!(settings.export.format, OutputFormat::Png);
        assert_eq!(settings.export.naming, NamingRule::Suffix);
        assert_eq!(settings.export.quality, 95);
    }

    #[test]
    fn missing_file_opens_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("none.json")).unwrap();
        assert_eq!(store.settings.watermark, WatermarkSpec::default());
    }

    #[test]
    fn templates_persist_and_track_recency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.json");
        let mut store = SettingsStore::open(&path).unwrap();

        let red = WatermarkSpec {
            color: "red".into(),
            ..WatermarkSpec::default()
        };
        store.add_template("red", red.clone()).unwrap();
        store.add_template("plain", WatermarkSpec::default()).unwrap();
        store.add_template("red", red.clone()).unwrap();
        assert_eq!(store.settings.recent.templates, vec!["red", "plain"]);

        let reopened = SettingsStore::open(&path).unwrap();
        assert_eq!(reopened.template("red"), Some(&red));
        assert_eq!(reopened.templates().count(), 2);

        assert!(store.remove_template("plain").unwrap());
        assert!(!store.remove_template("plain").unwrap());
        assert_eq!(store.settings.recent.templates, vec!["red"]);
    }

    #[test]
    fn recent_directories_are_capped_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::open(dir.path().join("s.json")).unwrap();
        for i in 0..12 {
            store.add_recent_directory(format!("/photos/{i}"));
        }
        store.add_recent_directory("/photos/5");
        let recent = store.recent_directories();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0], PathBuf::from("/photos/5"));
        assert_eq!(recent.iter().filter(|p| p.ends_with("5")).count(), 1);
    }

    #[test]
    fn corrupt_file_opens_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.settings, Settings::default());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn corrupt_import_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        let mut store = SettingsStore::open(dir.path().join("s.json")).unwrap();
        assert!(matches!(store.import_from(&bad), Err(AppError::Json(_))));
    }

    #[test]
    fn reset_restores_defaults_and_keeps_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut store = SettingsStore::open(&path).unwrap();
        store.settings.watermark.opacity = 10;
        store.add_recent_directory("/photos/trip");
        let night = WatermarkSpec {
            text: "night".into(),
            ..WatermarkSpec::default()
        };
        store.add_template("night", night.clone()).unwrap();
        store.reset().unwrap();

        let reopened = SettingsStore::open(&path).unwrap();
        assert_eq!(reopened.settings.watermark.opacity, 100);
        assert!(reopened.recent_directories().is_empty());
        assert_eq!(reopened.template("night"), Some(&night));
        assert_eq!(reopened.settings.recent.templates, vec!["night"]);
    }

    #[test]
    fn export_then_import_merges_templates() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = SettingsStore::open(dir.path().join("a.json")).unwrap();
        source.settings.watermark.text = "exported".into();
        source.add_template("shared", WatermarkSpec::default()).unwrap();
        let exported = dir.path().join("export.json");
        source.export_to(&exported).unwrap();

        let mut target = SettingsStore::open(dir.path().join("b.json")).unwrap();
        target.add_template("local", WatermarkSpec::default()).unwrap();
        target.import_from(&exported).unwrap();
        assert_eq!(target.settings.watermark.text, "exported");
        assert!(target.template("local").is_some());
        assert!(target.template("shared").is_some());
    }
}
