//! Per-ride CSV log.
//!
//! While a ride is recording, one row per log interval is appended to
//! `<rides>/<YYYY-MM-DD_HHMMSS>_<route>.csv`. Rows are flushed as they are
//! written so a crash loses at most the current row. The same files feed the
//! ride history used for ghost comparisons.

use crate::ride::state::{RideSnapshot, RideStateReader};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Column order of every ride log.
pub const CSV_HEADER: &str = "timestamp,elapsed_time_s,distance_m,speed_kmh,power_w,cadence_rpm,heart_rate_bpm,grade_pct,mode,resistance_scale";

/// Errors writing a ride log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to create ride log {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write ride log: {0}")]
    Write(#[from] std::io::Error),

    #[error("Logger task failed: {0}")]
    Task(String),
}

/// Make a route name safe for use in a file name.
///
/// Letters, digits, `-` and `_` are kept, spaces become `_` and anything else
/// is replaced with `_`.
pub fn sanitize_route_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name for a ride started at `started_at` on `route_name`.
pub fn ride_file_name(started_at: DateTime<Local>, route_name: &str) -> String {
    format!(
        "{}_{}.csv",
        started_at.format("%Y-%m-%d_%H%M%S"),
        sanitize_route_name(route_name)
    )
}

/// Writer for a single ride log file.
#[derive(Debug)]
pub struct RideLogger {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl RideLogger {
    /// Create the log file in `dir` and write the header.
    pub fn create(
        dir: &Path,
        route_name: &str,
        started_at: DateTime<Local>,
    ) -> Result<Self, LogError> {
        let path = dir.join(ride_file_name(started_at, route_name));
        let create_err = |source| LogError::Create {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(create_err)?;
        let file = File::create(&path).map_err(create_err)?;

        let mut out = BufWriter::new(file);
        writeln!(out, "{}", CSV_HEADER)?;
        out.flush()?;

        tracing::info!("Recording ride to {}", path.display());
        Ok(Self { path, out, rows: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one row for `snapshot`.
    ///
    /// Nothing is written unless the ride is recording and not paused; the
    /// return value tells whether a row was written.
    pub fn write_row(
        &mut self,
        snapshot: &RideSnapshot,
        timestamp: DateTime<Local>,
    ) -> Result<bool, LogError> {
        if !snapshot.recording || snapshot.paused {
            return Ok(false);
        }

        let heart_rate = snapshot
            .heart_rate_bpm
            .map(|hr| hr.to_string())
            .unwrap_or_default();

        writeln!(
            self.out,
            "{},{:.1},{:.1},{:.1},{:.0},{:.0},{},{:.2},{},{:.2}",
            timestamp.format("%Y-%m-%dT%H:%M:%S%.6f"),
            snapshot.elapsed_time_s,
            snapshot.distance_m,
            snapshot.speed_kmh(),
            snapshot.power_w,
            snapshot.cadence_rpm,
            heart_rate,
            snapshot.grade_pct,
            snapshot.mode.label(),
            snapshot.resistance_scale,
        )?;
        self.out.flush()?;
        self.rows += 1;
        Ok(true)
    }

    /// Flush and close, keeping the file.
    pub fn finish(mut self) -> Result<PathBuf, LogError> {
        self.out.flush()?;
        tracing::info!("Saved {} rows to {}", self.rows, self.path.display());
        Ok(self.path)
    }

    /// Close and delete the file.
    pub fn discard(self) -> Result<(), LogError> {
        let RideLogger { path, out, .. } = self;
        drop(out);
        fs::remove_file(&path)?;
        tracing::info!("Discarded ride log {}", path.display());
        Ok(())
    }
}

/// A logger running on its own task.
#[derive(Debug)]
pub struct LoggerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<RideLogger, LogError>>,
}

impl LoggerHandle {
    /// Stop sampling and get the logger back so the caller can keep or
    /// discard the file.
    pub async fn stop(mut self) -> Result<RideLogger, LogError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
            .await
            .map_err(|e| LogError::Task(e.to_string()))?
    }
}

/// Sample `reader` every `interval` into `logger` until stopped or the ride
/// state writer goes away.
///
/// On the way out the ride's final snapshot is logged if the last sample
/// missed it, so a completed ride ends on the route's full distance.
pub fn spawn_logger(
    mut logger: RideLogger,
    reader: RideStateReader,
    interval: Duration,
) -> LoggerHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seq = None;

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    if reader.is_closed() {
                        break;
                    }
                    let snapshot = reader.snapshot();
                    if logger.write_row(&snapshot, Local::now())? {
                        last_seq = Some(snapshot.seq);
                    }
                }
            }
        }

        if let Some(last) = reader.finished() {
            if last_seq != Some(last.seq) {
                logger.write_row(&last, Local::now())?;
            }
        }
        Ok::<_, LogError>(logger)
    });

    LoggerHandle {
        stop: Some(stop_tx),
        task,
    }
}
