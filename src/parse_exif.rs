use exif::{Field, In, Tag, Value};
use jiff::Timestamp;
use jiff::civil::Date;
use jiff::tz::TimeZone;
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use std::fs::{self, File};
use std::io::BufReader;
use std::panic;
use std::path::Path;
use tracing::debug;

use crate::error::AppError;

/// Capture-time fields, in the order they are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    DateTimeOriginal,
    DateTimeDigitized,
    DateTime,
}

impl DateField {
    pub const ALL: [DateField; 3] = [
        DateField::DateTimeOriginal,
        DateField::DateTimeDigitized,
        DateField::DateTime,
    ];
}

pub trait MetadataReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw value of `field`, e.g. `"2023:05:10 09:00:00"`, if the image carries it.
    fn read_field(&self, path: &Path, field: DateField) -> Result<Option<String>, AppError>;
}

/// Reads EXIF through kamadak-exif.
#[derive(Debug, Default, Clone, Copy)]
pub struct KamadakReader;

impl MetadataReader for KamadakReader {
    fn name(&self) -> &'static str {
        "kamadak-exif"
    }

    fn read_field(&self, path: &Path, field: DateField) -> Result<Option<String>, AppError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let exif = exif::Reader::new().read_from_container(&mut reader)?;

        let tag = match field {
            DateField::DateTimeOriginal => Tag::DateTimeOriginal,
            DateField::DateTimeDigitized => Tag::DateTimeDigitized,
            DateField::DateTime => Tag::DateTime,
        };
        let Some(Field {
            value: Value::Ascii(values),
            ..
        }) = exif.get_field(tag, In::PRIMARY)
        else {
            return Ok(None);
        };
        let Some(first) = values.first() else {
            return Ok(None);
        };
        Ok(Some(String::from_utf8(first.clone())?))
    }
}

/// Reads EXIF through little_exif, an implementation independent of kamadak-exif.
#[derive(Debug, Default, Clone, Copy)]
pub struct LittleExifReader;

impl MetadataReader for LittleExifReader {
    fn name(&self) -> &'static str {
        "little_exif"
    }

    fn read_field(&self, path: &Path, field: DateField) -> Result<Option<String>, AppError> {
        let path_owned = path.to_path_buf();
        // little_exif panics on some malformed containers
        let metadata = panic::catch_unwind(move || Metadata::new_from_path(&path_owned))
            .map_err(|_| AppError::MetadataUnavailable(path.to_path_buf()))??;

        let probe = match field {
            DateField::DateTimeOriginal => ExifTag::DateTimeOriginal(String::new()),
            DateField::DateTimeDigitized => ExifTag::CreateDate(String::new()),
            DateField::DateTime => ExifTag::ModifyDate(String::new()),
        };
        let value = metadata.get_tag(&probe).find_map(|tag| match tag {
            ExifTag::DateTimeOriginal(s) | ExifTag::CreateDate(s) | ExifTag::ModifyDate(s) => {
                Some(s.trim_end_matches('\0').to_string())
            }
            _ => None,
        });
        Ok(value)
    }
}

/// Converts an EXIF `"YYYY:MM:DD HH:MM:SS"` value to `"YYYY-MM-DD"`.
pub fn exif_date_to_display(raw: &str) -> Option<String> {
    let date_part = raw.split_whitespace().next()?;
    match Date::strptime("%Y:%m:%d", date_part) {
        Ok(date) => Some(date.strftime("%Y-%m-%d").to_string()),
        Err(e) => {
            debug!("{e}. Could not parse {raw:?} as an EXIF date.");
            None
        }
    }
}

/// One step of the date fallback chain.
pub trait DateSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn date_for(&self, path: &Path) -> Result<Option<String>, AppError>;
}

/// Consults the capture-time fields of a metadata reader in order.
pub struct ExifDateSource<R> {
    reader: R,
}

impl<R: MetadataReader> ExifDateSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: MetadataReader> DateSource for ExifDateSource<R> {
    fn name(&self) -> &'static str {
        self.reader.name()
    }

    fn date_for(&self, path: &Path) -> Result<Option<String>, AppError> {
        for field in DateField::ALL {
            let Some(raw) = self.reader.read_field(path, field)? else {
                debug!("No {field:?} found by {}", self.reader.name());
                continue;
            };
            if let Some(date) = exif_date_to_display(&raw) {
                return Ok(Some(date));
            }
        }
        Ok(None)
    }
}

/// Last modification time of the file, in the local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileModifiedSource;

impl DateSource for FileModifiedSource {
    fn name(&self) -> &'static str {
        "file modification time"
    }

    fn date_for(&self, path: &Path) -> Result<Option<String>, AppError> {
        let modified = fs::metadata(path)?.modified()?;
        let ts = Timestamp::try_from(modified)?;
        Ok(Some(ts.to_zoned(TimeZone::system()).strftime("%Y-%m-%d").to_string()))
    }
}

/// Resolves the display date of an image through an ordered chain of sources;
/// the first source that produces a date wins.
pub struct DateResolver {
    sources: Vec<Box<dyn DateSource>>,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::with_readers(KamadakReader, LittleExifReader)
    }
}

impl DateResolver {
    /// The standard chain: primary reader, secondary reader, file modification time.
    pub fn with_readers<P, S>(primary: P, secondary: S) -> Self
    where
        P: MetadataReader + 'static,
        S: MetadataReader + 'static,
    {
        Self::with_sources(vec![
            Box::new(ExifDateSource::new(primary)),
            Box::new(ExifDateSource::new(secondary)),
            Box::new(FileModifiedSource),
        ])
    }

    pub fn with_sources(sources: Vec<Box<dyn DateSource>>) -> Self {
        Self { sources }
    }

    /// `"YYYY-MM-DD"`, or `None` when no source could produce a date.
    /// Failures of individual sources are logged and skipped.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        let path = path.as_ref();
        self.sources.iter().find_map(|source| match source.date_for(path) {
            Ok(Some(date)) => {
                debug!("Date {date} for {path:?} from {}", source.name());
                Some(date)
            }
            Ok(None) => {
                debug!("{} had no date for {path:?}", source.name());
                None
            }
            Err(e) => {
                debug!("{e}. {} could not read {path:?}", source.name());
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Broken;

    impl MetadataReader for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn read_field(&self, path: &Path, _field: DateField) -> Result<Option<String>, AppError> {
            Err(AppError::MetadataUnavailable(path.to_path_buf()))
        }
    }

    struct Fixed(HashMap<&'static str, &'static str>);

    impl Fixed {
        fn with(fields: &[(&'static str, &'static str)]) -> Self {
            Self(fields.iter().copied().collect())
        }
    }

    impl MetadataReader for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn read_field(&self, _path: &Path, field: DateField) -> Result<Option<String>, AppError> {
            let key = match field {
                DateField::DateTimeOriginal => "DateTimeOriginal",
                DateField::DateTimeDigitized => "DateTimeDigitized",
                DateField::DateTime => "DateTime",
            };
            Ok(self.0.get(key).map(ToString::to_string))
        }
    }

    fn ascii_entry(
        ifd: &mut Vec<u8>,
        data: &mut Vec<u8>,
        data_at: usize,
        tag: u16,
        value: &str,
    ) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        ifd.extend(tag.to_le_bytes());
        ifd.extend(2u16.to_le_bytes());
        ifd.extend((bytes.len() as u32).to_le_bytes());
        ifd.extend(((data_at + data.len()) as u32).to_le_bytes());
        data.extend(bytes);
    }

    /// Little-endian TIFF block with ASCII values in IFD0 and the Exif IFD.
    /// Values must be longer than four bytes.
    fn exif_block(ifd0: &[(u16, &str)], exif_ifd: &[(u16, &str)]) -> Vec<u8> {
        let ifd_len = |entries: usize| 2 + 12 * entries + 4;
        let exif_at = 8 + ifd_len(ifd0.len() + 1);
        let data_at = exif_at + ifd_len(exif_ifd.len());
        let mut data = Vec::new();

        let mut tiff = b"II\x2a\x00".to_vec();
        tiff.extend(8u32.to_le_bytes());
        tiff.extend(((ifd0.len() + 1) as u16).to_le_bytes());
        for (tag, value) in ifd0 {
            ascii_entry(&mut tiff, &mut data, data_at, *tag, value);
        }
        tiff.extend(0x8769u16.to_le_bytes());
        tiff.extend(4u16.to_le_bytes());
        tiff.extend(1u32.to_le_bytes());
        tiff.extend((exif_at as u32).to_le_bytes());
        tiff.extend(0u32.to_le_bytes());

        tiff.extend((exif_ifd.len() as u16).to_le_bytes());
        for (tag, value) in exif_ifd {
            ascii_entry(&mut tiff, &mut data, data_at, *tag, value);
        }
        tiff.extend(0u32.to_le_bytes());
        assert_eq!(tiff.len(), data_at);
        tiff.extend(data);
        tiff
    }

    fn jpeg_with_exif(path: &Path, exif: Vec<u8>) {
        use img_parts::{Bytes, ImageEXIF, jpeg::Jpeg};

        let mut buf = Vec::new();
        image::RgbImage::from_pixel(16, 16, image::Rgb([120, 60, 30]))
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        let mut jpeg = Jpeg::from_bytes(Bytes::from(buf)).unwrap();
        jpeg.set_exif(Some(Bytes::from(exif)));
        fs::write(path, jpeg.encoder().bytes()).unwrap();
    }

    #[test]
    fn little_exif_reads_the_original_date_when_primary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.jpg");
        jpeg_with_exif(&path, exif_block(&[], &[(0x9003, "2023:05:10 09:00:00")]));

        let source = ExifDateSource::new(LittleExifReader);
        assert_eq!(source.date_for(&path).unwrap().as_deref(), Some("2023-05-10"));

        let resolver = DateResolver::with_sources(vec![
            Box::new(ExifDateSource::new(Broken)),
            Box::new(ExifDateSource::new(LittleExifReader)),
        ]);
        assert_eq!(resolver.resolve(&path).as_deref(), Some("2023-05-10"));
    }

    #[test]
    fn little_exif_maps_digitized_and_modified_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.jpg");
        jpeg_with_exif(
            &path,
            exif_block(
                &[(0x0132, "2021:01:01 00:00:00")],
                &[(0x9004, "2020:02:02 00:00:00")],
            ),
        );

        let reader = LittleExifReader;
        assert_eq!(reader.read_field(&path, DateField::DateTimeOriginal).unwrap(), None);
        assert_eq!(
            reader.read_field(&path, DateField::DateTimeDigitized).unwrap().as_deref(),
            Some("2020:02:02 00:00:00")
        );
        assert_eq!(
            reader.read_field(&path, DateField::DateTime).unwrap().as_deref(),
            Some("2021:01:01 00:00:00")
        );

        let resolver = DateResolver::with_sources(vec![
            Box::new(ExifDateSource::new(Broken)),
            Box::new(ExifDateSource::new(LittleExifReader)),
        ]);
        assert_eq!(resolver.resolve(&path).as_deref(), Some("2020-02-02"));
    }

    #[test]
    fn readers_agree_on_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("both.jpg");
        jpeg_with_exif(
            &path,
            exif_block(
                &[(0x0132, "2021:01:01 00:00:00")],
                &[(0x9003, "2019:03:04 05:06:07"), (0x9004, "2020:02:02 00:00:00")],
            ),
        );
        for field in DateField::ALL {
            assert_eq!(
                KamadakReader.read_field(&path, field).unwrap(),
                LittleExifReader.read_field(&path, field).unwrap(),
                "{field:?}"
            );
        }
    }

    #[test]
    fn exif_dates_are_reformatted() {
        assert_eq!(
            exif_date_to_display("2023:05:10 09:00:00").as_deref(),
            Some("2023-05-10")
        );
        assert_eq!(exif_date_to_display("2019:12:31").as_deref(), Some("2019-12-31"));
        assert_eq!(exif_date_to_display("0000:00:00 00:00:00"), None);
        assert_eq!(exif_date_to_display(""), None);
    }

    #[test]
    fn secondary_reader_used_when_primary_fails() {
        let resolver = DateResolver::with_readers(
            Broken,
            Fixed::with(&[("DateTimeOriginal", "2023:05:10 09:00:00")]),
        );
        assert_eq!(resolver.resolve("/no/such/file.jpg").as_deref(), Some("2023-05-10"));
    }

    #[test]
    fn fields_are_checked_in_order() {
        let resolver = DateResolver::with_readers(
            Fixed::with(&[
                ("DateTime", "2021:01:01 00:00:00"),
                ("DateTimeDigitized", "2020:02:02 00:00:00"),
            ]),
            Broken,
        );
        assert_eq!(resolver.resolve("x.jpg").as_deref(), Some("2020-02-02"));
    }

    #[test]
    fn unparsable_values_fall_through_to_the_next_field() {
        let resolver = DateResolver::with_readers(
            Fixed::with(&[
                ("DateTimeOriginal", "    "),
                ("DateTime", "2018:07:04 12:00:00"),
            ]),
            Broken,
        );
        assert_eq!(resolver.resolve("x.jpg").as_deref(), Some("2018-07-04"));
    }

    #[test]
    fn falls_back_to_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();

        let resolver = DateResolver::with_readers(Broken, Broken);
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        let want = Timestamp::try_from(modified)
            .unwrap()
            .to_zoned(TimeZone::system())
            .strftime("%Y-%m-%d")
            .to_string();
        assert_eq!(resolver.resolve(&path), Some(want));
    }

    #[test]
    fn nothing_readable_means_no_date() {
        let resolver = DateResolver::default();
        assert_eq!(resolver.resolve("/definitely/not/here.jpg"), None);
    }
}
