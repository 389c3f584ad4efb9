use std::{error::Error, fmt, io, path::PathBuf, string::FromUtf8Error};

use ab_glyph::InvalidFont;
use image::ImageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    InvalidFont(#[from] InvalidFont),
    #[error(transparent)]
    Exif(#[from] exif::Error),
    #[error(transparent)]
    Utf8Parse(#[from] FromUtf8Error),
    #[error(transparent)]
    DateTimeParse(#[from] jiff::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("No capture date could be read from {0:?}")]
    MetadataUnavailable(PathBuf),
    #[error("Could not read the image {path:?}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("Could not write the image {path:?}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("The output format {0} is not supported")]
    UnsupportedFormat(String),
    #[error("Watermarking {path:?} failed: {reason}")]
    Composition {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
    #[error("The batch worker stopped unexpectedly: {0}")]
    Worker(String),
}

/// Coarse failure classes reported per item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    MetadataUnavailable,
    ImageRead,
    ImageWrite,
    UnsupportedFormat,
    Composition,
}

impl AppError {
    /// Attaches `path` to errors that carry no category of their own. The
    /// original error stays available through `source()`.
    pub fn in_composition_of(self, path: impl Into<PathBuf>) -> Self {
        match self {
            AppError::MetadataUnavailable(_)
            | AppError::ImageRead { .. }
            | AppError::ImageWrite { .. }
            | AppError::UnsupportedFormat(_)
            | AppError::Composition { .. } => self,
            other => AppError::Composition {
                path: path.into(),
                reason: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::MetadataUnavailable(_) => ErrorCategory::MetadataUnavailable,
            AppError::ImageRead { .. } => ErrorCategory::ImageRead,
            AppError::ImageWrite { .. } => ErrorCategory::ImageWrite,
            AppError::UnsupportedFormat(_) => ErrorCategory::UnsupportedFormat,
            _ => ErrorCategory::Composition,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::MetadataUnavailable => "MetadataUnavailable",
            ErrorCategory::ImageRead => "ImageReadError",
            ErrorCategory::ImageWrite => "ImageWriteError",
            ErrorCategory::UnsupportedFormat => "UnsupportedFormat",
            ErrorCategory::Composition => "CompositionError",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_errors_keep_their_category() {
        let read = AppError::ImageRead {
            path: PathBuf::from("a.jpg"),
            source: ImageError::IoError(io::Error::from(io::ErrorKind::NotFound)),
        };
        assert_eq!(read.category(), ErrorCategory::ImageRead);

        let write = AppError::ImageWrite {
            path: PathBuf::from("/out/a.jpg"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(write.category(), ErrorCategory::ImageWrite);
        assert_eq!(
            AppError::UnsupportedFormat("WEBP".into()).category(),
            ErrorCategory::UnsupportedFormat
        );
    }

    #[test]
    fn unclassified_errors_are_composition_failures() {
        let err = AppError::Io(io::Error::other("boom"));
        assert_eq!(err.category(), ErrorCategory::Composition);
        assert_eq!(ErrorCategory::Composition.to_string(), "CompositionError");
    }

    #[test]
    fn composition_failures_keep_their_cause() {
        let err = AppError::Io(io::Error::other("disk on fire")).in_composition_of("a.jpg");
        let AppError::Composition { path, .. } = &err else {
            panic!("expected a composition error, got {err:?}");
        };
        assert_eq!(path, &PathBuf::from("a.jpg"));
        assert_eq!(err.category(), ErrorCategory::Composition);
        let cause = err.source().expect("cause attached");
        assert_eq!(cause.to_string(), "disk on fire");

        let read = AppError::UnsupportedFormat("WEBP".into()).in_composition_of("a.jpg");
        assert!(matches!(read, AppError::UnsupportedFormat(_)));
    }
}
