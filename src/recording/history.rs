//! Prior rides on disk.

use crate::recording::logger::sanitize_route_name;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Length of the `YYYY-MM-DD_HHMMSS` prefix of ride log names.
const TIMESTAMP_LEN: usize = 17;

/// Errors listing ride history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to read ride history in {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One prior ride reduced to what ghost comparisons need.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRide {
    pub path: PathBuf,
    /// `(elapsed_time_s, distance_m)` in file order
    pub samples: Vec<(f64, f64)>,
}

/// Source of prior rides for a route.
pub trait RideHistory: Send + Sync {
    fn rides_for_route(&self, route_id: &str) -> Result<Vec<RecordedRide>, HistoryError>;
}

/// Ride history backed by the ride logger's CSV files.
#[derive(Debug, Clone)]
pub struct CsvRideHistory {
    dir: PathBuf,
}

impl CsvRideHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RideHistory for CsvRideHistory {
    fn rides_for_route(&self, route_id: &str) -> Result<Vec<RecordedRide>, HistoryError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let expected = format!("{}.csv", sanitize_route_name(route_id));
        let entries = fs::read_dir(&self.dir).map_err(|source| HistoryError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .and_then(route_part)
                    .is_some_and(|route| route == expected)
            })
            .collect();
        paths.sort();

        let mut rides = Vec::new();
        for path in paths {
            match read_ride(&path) {
                Some(samples) => rides.push(RecordedRide { path, samples }),
                None => tracing::debug!("Skipping unreadable ride {}", path.display()),
            }
        }
        Ok(rides)
    }
}

/// Route part of a ride log name: whatever follows the
/// `YYYY-MM-DD_HHMMSS_` start-time prefix.
fn route_part(file_name: &str) -> Option<&str> {
    let stamp = file_name.get(..TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H%M%S").ok()?;
    file_name.get(TIMESTAMP_LEN..)?.strip_prefix('_')
}

/// Parse `(elapsed_time_s, distance_m)` pairs from a ride log.
///
/// Rows whose values are missing or not finite are skipped. Returns `None`
/// when the file cannot be read or lacks either column.
fn read_ride(path: &Path) -> Option<Vec<(f64, f64)>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Failed to read ride {}: {}", path.display(), e);
            return None;
        }
    };

    let mut lines = content.lines();
    let header: Vec<&str> = lines.next()?.split(',').map(str::trim).collect();
    let time_col = header.iter().position(|c| *c == "elapsed_time_s")?;
    let distance_col = header.iter().position(|c| *c == "distance_m")?;

    let samples = lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            let time = fields.get(time_col)?.trim().parse::<f64>().ok()?;
            let distance = fields.get(distance_col)?.trim().parse::<f64>().ok()?;
            (time.is_finite() && distance.is_finite()).then_some((time, distance))
        })
        .collect();
    Some(samples)
}
