//! Tuning-file loading.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization of [`Tuning`] from a data directory. Every tuning section
//! is `#[serde(default)]`, so a file only needs the values it overrides.

use log::{debug, info};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tractwear_core::config::Tuning;

/// Base name of the tuning file inside a data directory.
pub const TUNING_FILE: &str = "tuning";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading tuning data.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A value parsed but is outside the range the engine accepts.
    #[error("invalid value for {field} in {file}: {detail}")]
    InvalidValue {
        file: PathBuf,
        field: &'static str,
        detail: String,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    const ALL: [(Format, &'static str); 3] = [
        (Format::Ron, "ron"),
        (Format::Toml, "toml"),
        (Format::Json, "json"),
    ];
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .iter()
        .find(|(_, name)| Some(*name) == ext)
        .map(|(format, _)| *format)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for `{base_name}.ron`, `.toml` or `.json`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for (_, ext) in Format::ALL {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if !candidate.exists() {
            continue;
        }
        if let Some(existing) = found {
            return Err(DataLoadError::ConflictingFormats {
                a: existing,
                b: candidate,
            });
        }
        found = Some(candidate);
    }

    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its format.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    path: &Path,
) -> Result<T, DataLoadError> {
    let parse_err = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_err(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
    }
}

// ===========================================================================
// Tuning
// ===========================================================================

/// Load a single tuning file. Missing sections and fields keep their
/// defaults.
pub fn load_tuning_file(path: &Path) -> Result<Tuning, DataLoadError> {
    let tuning: Tuning = deserialize_file(path)?;
    validate_tuning(&tuning, path)?;
    info!("loaded tuning from {}", path.display());
    Ok(tuning)
}

/// Load `tuning.{ron,toml,json}` from `dir`, or the defaults when the
/// directory has none.
pub fn load_tuning(dir: &Path) -> Result<Tuning, DataLoadError> {
    match find_data_file(dir, TUNING_FILE)? {
        Some(path) => load_tuning_file(&path),
        None => {
            debug!("no tuning file in {}, using defaults", dir.display());
            Ok(Tuning::default())
        }
    }
}

/// Reject values the engine cannot work with. Everything else is taken as
/// written.
fn validate_tuning(tuning: &Tuning, path: &Path) -> Result<(), DataLoadError> {
    let invalid = |field: &'static str, detail: String| DataLoadError::InvalidValue {
        file: path.to_path_buf(),
        field,
        detail,
    };

    if tuning.scheduler.periodic_interval_ms == 0 {
        return Err(invalid(
            "scheduler.periodic_interval_ms",
            "must be greater than zero".to_string(),
        ));
    }

    let m = &tuning.malfunction;
    let triggers = [
        ("malfunction.misfire", &m.misfire),
        ("malfunction.overheat", &m.overheat),
        ("malfunction.surge.trigger", &m.surge.trigger),
        ("malfunction.stuck_down", &m.stuck_down),
        ("malfunction.stuck_up", &m.stuck_up),
        ("malfunction.implement_pull", &m.implement_pull),
        ("malfunction.implement_drag", &m.implement_drag),
        ("malfunction.reduced_turning", &m.reduced_turning),
    ];
    for (field, trigger) in triggers {
        if trigger.min_duration_ms > trigger.max_duration_ms {
            return Err(invalid(
                field,
                format!(
                    "min_duration_ms {} exceeds max_duration_ms {}",
                    trigger.min_duration_ms, trigger.max_duration_ms
                ),
            ));
        }
        if trigger.chance_per_s.is_nan() || trigger.chance_per_s < 0.0 {
            return Err(invalid(field, "chance_per_s must be >= 0".to_string()));
        }
    }

    let r = &tuning.reliability;
    if r.lifetime_min > r.lifetime_max {
        return Err(invalid(
            "reliability.lifetime_min",
            format!("{} exceeds lifetime_max {}", r.lifetime_min, r.lifetime_max),
        ));
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
