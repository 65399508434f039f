// Marker files: timestamp sources and error markers

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const MARKER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Zone abbreviations `date` prints on hosts configured for US time
const NAMED_ZONE_HOURS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("UT", 0),
    ("GMT", 0),
    ("Z", 0),
    ("EST", -5),
    ("EDT", -4),
    ("CST", -6),
    ("CDT", -5),
    ("MST", -7),
    ("MDT", -6),
    ("PST", -8),
    ("PDT", -7),
];

/// Why a marker could not be turned into a timestamp
#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not parse timestamp '{text}': {reason}")]
    Parse { text: String, reason: String },
}

/// Render a marker timestamp: `YYYY-MM-DD HH:MM:SS UTC`
pub fn format_marker_timestamp(at: DateTime<Utc>) -> String {
    format!("{} UTC", at.format(MARKER_DATETIME_FORMAT))
}

/// Parse `YYYY-MM-DD HH:MM:SS TZ`
///
/// TZ may be `UTC`, `UT`, `GMT`, `Z`, a US zone abbreviation (`EST`, `EDT`,
/// `CST`, `CDT`, `MST`, `MDT`, `PST`, `PDT`) or a numeric offset (`+0000`,
/// `-05:00`).
pub fn parse_marker_timestamp(text: &str) -> Result<DateTime<Utc>, MarkerError> {
    let text = text.trim();
    let parse_error = |reason: String| MarkerError::Parse {
        text: text.to_string(),
        reason,
    };

    let (datetime, zone) = text
        .rsplit_once(' ')
        .ok_or_else(|| parse_error("missing time zone".to_string()))?;

    let Some(offset) = named_zone_offset(zone) else {
        return DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z")
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| parse_error(format!("{e} (zone '{zone}')")));
    };

    let naive = NaiveDateTime::parse_from_str(datetime, MARKER_DATETIME_FORMAT)
        .map_err(|e| parse_error(e.to_string()))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| parse_error(format!("no single instant in zone '{zone}'")))
}

fn named_zone_offset(zone: &str) -> Option<FixedOffset> {
    let zone = zone.to_ascii_uppercase();
    NAMED_ZONE_HOURS
        .iter()
        .find(|(name, _)| *name == zone)
        .and_then(|(_, hours)| FixedOffset::east_opt(hours * 3600))
}

/// A marker file whose content is a timestamp
#[derive(Debug, Clone)]
pub struct TimestampSource {
    path: PathBuf,
    mtime_fallback: bool,
}

impl TimestampSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mtime_fallback: false,
        }
    }

    /// Use the file's modification time when its content does not parse
    pub fn with_mtime_fallback(mut self, enabled: bool) -> Self {
        self.mtime_fallback = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker
    ///
    /// # Returns
    /// - `Ok(None)` if the file does not exist
    /// - `Ok(Some(t))` with the parsed (or fallback) timestamp
    ///
    /// # Errors
    /// MarkerError if the file exists but cannot be read or parsed
    pub fn read(&self) -> Result<Option<DateTime<Utc>>, MarkerError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MarkerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match parse_marker_timestamp(&text) {
            Ok(at) => Ok(Some(at)),
            Err(parse_err) if self.mtime_fallback => {
                debug!(
                    path = %self.path.display(),
                    error = %parse_err,
                    "Marker content unparsable, using modification time"
                );
                self.modified().map(Some)
            }
            Err(parse_err) => Err(parse_err),
        }
    }

    /// Read the marker, logging and swallowing failures
    pub fn read_logged(&self) -> Option<DateTime<Utc>> {
        match self.read() {
            Ok(Some(at)) => Some(at),
            Ok(None) => {
                debug!(path = %self.path.display(), "Marker not present");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring marker");
                None
            }
        }
    }

    fn modified(&self) -> Result<DateTime<Utc>, MarkerError> {
        fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .map_err(|source| MarkerError::Read {
                path: self.path.clone(),
                source,
            })
    }
}

/// Presence marker: a file, or a directory holding at least one entry
#[derive(Debug, Clone)]
pub struct ErrorMarker {
    path: PathBuf,
}

impl ErrorMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_present(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => fs::read_dir(&self.path)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false),
            Ok(_) => true,
            Err(_) => false,
        }
    }
}
