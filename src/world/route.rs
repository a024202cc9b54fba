//! Route definitions
//!
//! Routes are elevation profiles: ordered `(distance, elevation)` points loaded
//! from JSON files. Grade queries use a copy resampled every 10 m so that the
//! grade does not jump around where the source points are dense.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Spacing of the resampled profile used for grade lookups, in meters.
pub const RESAMPLE_STEP_M: f64 = 10.0;

/// Read-only view of a route used by the control loop.
pub trait RouteProfile: Send + Sync {
    /// Route identifier (its name)
    fn name(&self) -> &str;

    /// Grade in percent at a distance. Distances past either end use the
    /// first or last segment.
    fn grade_at(&self, distance_m: f64) -> f64;

    /// Interpolated elevation at a distance, in meters.
    fn elevation_at(&self, distance_m: f64) -> f64;

    /// Route length in meters.
    fn total_distance_m(&self) -> f64;
}

/// A point along a route
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    /// Distance from route start in meters
    pub distance_m: f64,
    /// Elevation in meters
    pub elevation_m: f64,
}

/// On-disk route format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub distance_km: f64,
    pub points: Vec<RoutePoint>,
}

/// Errors that can occur loading routes.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Failed to read route file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse route file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid route: {0}")]
    Invalid(String),
}

/// Validated route geometry.
#[derive(Debug, Clone)]
pub struct RouteGeometry {
    name: String,
    description: String,
    points: Vec<RoutePoint>,
    resampled: Vec<RoutePoint>,
}

impl RouteGeometry {
    /// Build a route from raw points.
    ///
    /// Requires at least two points, non-decreasing distances and a positive length.
    pub fn new(name: impl Into<String>, points: Vec<RoutePoint>) -> Result<Self, RouteError> {
        if points.len() < 2 {
            return Err(RouteError::Invalid(format!(
                "route needs at least 2 points, got {}",
                points.len()
            )));
        }
        if points
            .iter()
            .any(|p| !p.distance_m.is_finite() || !p.elevation_m.is_finite())
        {
            return Err(RouteError::Invalid("non-finite route point".to_string()));
        }
        if points.windows(2).any(|w| w[1].distance_m < w[0].distance_m) {
            return Err(RouteError::Invalid(
                "route distances must be non-decreasing".to_string(),
            ));
        }
        let start = points[0].distance_m;
        let end = points[points.len() - 1].distance_m;
        if end - start <= 0.0 {
            return Err(RouteError::Invalid("route has zero length".to_string()));
        }

        let mut route = Self {
            name: name.into(),
            description: String::new(),
            points,
            resampled: Vec::new(),
        };
        route.resampled = route.resample(RESAMPLE_STEP_M);
        Ok(route)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    /// Evenly spaced copy of the profile, with the final point at the route end.
    pub fn resampled(&self) -> &[RoutePoint] {
        &self.resampled
    }

    fn start_m(&self) -> f64 {
        self.points[0].distance_m
    }

    fn end_m(&self) -> f64 {
        self.points[self.points.len() - 1].distance_m
    }

    fn resample(&self, step: f64) -> Vec<RoutePoint> {
        let start = self.start_m();
        let end = self.end_m();
        let mut resampled = Vec::new();

        let mut i = 0u32;
        loop {
            let distance_m = start + f64::from(i) * step;
            if distance_m >= end {
                break;
            }
            resampled.push(RoutePoint {
                distance_m,
                elevation_m: self.elevation_at(distance_m),
            });
            i += 1;
        }
        resampled.push(RoutePoint {
            distance_m: end,
            elevation_m: self.elevation_at(end),
        });
        resampled
    }

    /// Index of the resampled segment containing `distance_m`.
    fn segment_index(&self, distance_m: f64) -> usize {
        let upper = self
            .resampled
            .partition_point(|p| p.distance_m <= distance_m);
        upper.saturating_sub(1).min(self.resampled.len() - 2)
    }
}

impl RouteProfile for RouteGeometry {
    fn name(&self) -> &str {
        &self.name
    }

    fn grade_at(&self, distance_m: f64) -> f64 {
        let i = self.segment_index(distance_m);
        let a = self.resampled[i];
        let b = self.resampled[i + 1];
        let run = b.distance_m - a.distance_m;
        if run <= 0.0 {
            return 0.0;
        }
        (b.elevation_m - a.elevation_m) / run * 100.0
    }

    fn elevation_at(&self, distance_m: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if distance_m <= first.distance_m {
            return first.elevation_m;
        }
        if distance_m >= last.distance_m {
            return last.elevation_m;
        }

        let upper = self.points.partition_point(|p| p.distance_m <= distance_m);
        let a = self.points[upper - 1];
        let b = self.points[upper];
        let run = b.distance_m - a.distance_m;
        if run <= 0.0 {
            return a.elevation_m;
        }
        let t = (distance_m - a.distance_m) / run;
        a.elevation_m + t * (b.elevation_m - a.elevation_m)
    }

    fn total_distance_m(&self) -> f64 {
        self.end_m()
    }
}

impl TryFrom<RouteFile> for RouteGeometry {
    type Error = RouteError;

    fn try_from(file: RouteFile) -> Result<Self, Self::Error> {
        let route = RouteGeometry::new(file.name, file.points)?.with_description(file.description);
        let declared_m = file.distance_km * 1000.0;
        if (declared_m - route.total_distance_m()).abs() > 1.0 {
            tracing::debug!(
                "Route '{}' declares {:.0} m but its points span {:.0} m",
                route.name(),
                declared_m,
                route.total_distance_m()
            );
        }
        Ok(route)
    }
}

impl From<&RouteGeometry> for RouteFile {
    fn from(route: &RouteGeometry) -> Self {
        RouteFile {
            name: route.name.clone(),
            description: route.description.clone(),
            distance_km: route.total_distance_m() / 1000.0,
            points: route.points.clone(),
        }
    }
}

/// Load a single route from a JSON file.
pub fn load_route_file(path: &Path) -> Result<RouteGeometry, RouteError> {
    let content = fs::read_to_string(path).map_err(|source| RouteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: RouteFile = serde_json::from_str(&content).map_err(|source| RouteError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    RouteGeometry::try_from(file)
}

/// Load every `*.json` route in a directory, sorted by name.
///
/// Files that fail to load are skipped with a warning.
pub fn load_routes(dir: &Path) -> Result<Vec<RouteGeometry>, RouteError> {
    let entries = fs::read_dir(dir).map_err(|source| RouteError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut routes = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load_route_file(&path) {
            Ok(route) => routes.push(route),
            Err(e) => tracing::warn!("Skipping route: {}", e),
        }
    }

    routes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(routes)
}

fn points(raw: &[(f64, f64)]) -> Vec<RoutePoint> {
    raw.iter()
        .map(|&(distance_m, elevation_m)| RoutePoint {
            distance_m,
            elevation_m,
        })
        .collect()
}

/// Built-in routes used when the routes directory is empty.
pub fn demo_routes() -> Vec<RouteFile> {
    vec![
        RouteFile {
            name: "Demo Hills".to_string(),
            description: "A sample hilly route for testing".to_string(),
            distance_km: 10.0,
            points: points(&[
                (0.0, 100.0),
                (1000.0, 150.0),
                (2000.0, 180.0),
                (3000.0, 170.0),
                (4000.0, 140.0),
                (5000.0, 90.0),
                (6000.0, 85.0),
                (7000.0, 120.0),
                (8000.0, 160.0),
                (9000.0, 190.0),
                (10000.0, 180.0),
            ]),
        },
        RouteFile {
            name: "Flat Road".to_string(),
            description: "Easy flat route for recovery".to_string(),
            distance_km: 5.0,
            points: points(&[
                (0.0, 100.0),
                (1000.0, 102.0),
                (2000.0, 101.0),
                (3000.0, 103.0),
                (4000.0, 100.0),
                (5000.0, 102.0),
            ]),
        },
    ]
}

/// The "Demo Hills" route.
pub fn demo_route() -> Result<RouteGeometry, RouteError> {
    demo_routes()
        .into_iter()
        .next()
        .ok_or_else(|| RouteError::Invalid("no built-in routes".to_string()))
        .and_then(RouteGeometry::try_from)
}

/// Write the built-in routes into `dir` if it holds no route files yet.
///
/// Returns the number of files written.
pub fn create_demo_routes(dir: &Path) -> Result<usize, RouteError> {
    let io_err = |source| RouteError::Io {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let has_routes = fs::read_dir(dir)
        .map_err(io_err)?
        .flatten()
        .any(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"));
    if has_routes {
        return Ok(0);
    }

    let mut written = 0;
    for route in demo_routes() {
        let file_name = format!("{}.json", route.name.to_lowercase().replace(' ', "_"));
        let path = dir.join(file_name);
        let json = serde_json::to_string_pretty(&route).map_err(|source| RouteError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| RouteError::Io { path, source })?;
        written += 1;
    }

    tracing::info!("Created {} demo routes in {:?}", written, dir);
    Ok(written)
}
