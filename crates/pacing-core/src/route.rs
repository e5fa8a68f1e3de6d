//! Route geometry: sampled profile, lap expansion, and continuous
//! gradient/friction lookup over distance.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PacingError, Result};
use crate::interp::{gaussian_filter, CubicSpline};

/// Samples closer than this (m) to the previously kept sample are dropped.
pub const DEDUP_TOLERANCE_M: f64 = 0.6;
/// Gaussian smoothing width applied to elevation, in samples.
pub const DEFAULT_SMOOTHING_SIGMA: f64 = 4.0;

/// Raw per-route arrays as stored in the route file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteData {
    pub distance: Vec<f64>,
    pub elevation: Vec<f64>,
    pub friction: Vec<f64>,
}

impl RouteData {
    pub fn validate(&self) -> Result<()> {
        let n = self.distance.len();
        if n < 2 {
            return Err(PacingError::RouteData(format!(
                "route needs at least 2 samples, got {}",
                n
            )));
        }
        if self.elevation.len() != n || self.friction.len() != n {
            return Err(PacingError::RouteData(format!(
                "array lengths differ: distance {}, elevation {}, friction {}",
                n,
                self.elevation.len(),
                self.friction.len()
            )));
        }
        let all_finite = self
            .distance
            .iter()
            .chain(&self.elevation)
            .chain(&self.friction)
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(PacingError::RouteData("non-finite sample".to_string()));
        }
        Ok(())
    }

    /// Rebuild the samples keeping only points at least
    /// [`DEDUP_TOLERANCE_M`] past the last kept one. A sample that goes
    /// backwards is rejected rather than dropped.
    pub fn dedup(&self) -> Result<RouteData> {
        self.validate()?;

        let mut out = RouteData {
            distance: Vec::with_capacity(self.distance.len()),
            elevation: Vec::with_capacity(self.distance.len()),
            friction: Vec::with_capacity(self.distance.len()),
        };
        for i in 0..self.distance.len() {
            let d = self.distance[i];
            if let Some(&last) = out.distance.last() {
                if d < last {
                    return Err(PacingError::RouteData(format!(
                        "distance decreases at sample {} ({:.2} < {:.2})",
                        i, d, last
                    )));
                }
                if d - last < DEDUP_TOLERANCE_M {
                    continue;
                }
            }
            out.distance.push(d);
            out.elevation.push(self.elevation[i]);
            out.friction.push(self.friction[i]);
        }

        if out.distance.len() < 2 {
            return Err(PacingError::RouteData(
                "fewer than 2 samples remain after de-duplication".to_string(),
            ));
        }
        Ok(out)
    }

    /// Concatenate the route `laps` times, offsetting each lap by the
    /// base route's maximum distance.
    pub fn expand_laps(&self, laps: usize) -> Result<RouteData> {
        if laps == 0 {
            return Err(PacingError::InvalidParameter(
                "num_laps must be at least 1".to_string(),
            ));
        }
        self.validate()?;

        let lap_length = self
            .distance
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let mut out = RouteData {
            distance: Vec::with_capacity(self.distance.len() * laps),
            elevation: Vec::with_capacity(self.distance.len() * laps),
            friction: Vec::with_capacity(self.distance.len() * laps),
        };
        for lap in 0..laps {
            let offset = lap as f64 * lap_length;
            out.distance.extend(self.distance.iter().map(|d| d + offset));
            out.elevation.extend_from_slice(&self.elevation);
            out.friction.extend_from_slice(&self.friction);
        }
        out.dedup()
    }
}

/// Named routes loaded from a route file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteLibrary {
    routes: BTreeMap<String, RouteData>,
}

impl RouteLibrary {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| PacingError::RouteData(format!("malformed route file: {}", err)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PacingError::RouteData(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn insert(&mut self, name: impl Into<String>, data: RouteData) {
        self.routes.insert(name.into(), data);
    }

    pub fn names(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Look up by display name ("Hilly Route") or slug ("hilly_route").
    pub fn resolve(&self, name: &str) -> Result<&RouteData> {
        if let Some(route) = self.routes.get(name) {
            return Ok(route);
        }
        let wanted = slugify(name);
        self.routes
            .iter()
            .find(|(key, _)| slugify(key) == wanted)
            .map(|(_, route)| route)
            .ok_or_else(|| PacingError::UnknownRoute(name.to_string()))
    }
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Immutable, de-duplicated route with smoothed gradient and continuous
/// gradient/friction interpolants.
#[derive(Debug, Clone)]
pub struct RouteProfile {
    samples: RouteData,
    smoothed_elevation: Vec<f64>,
    gradient: Vec<f64>,
    sigma: f64,
    gradient_spline: CubicSpline,
    friction_spline: CubicSpline,
}

impl RouteProfile {
    pub fn new(data: &RouteData) -> Result<Self> {
        Self::with_smoothing(data, DEFAULT_SMOOTHING_SIGMA)
    }

    pub fn with_smoothing(data: &RouteData, sigma: f64) -> Result<Self> {
        let samples = data.dedup()?;
        let smoothed_elevation = gaussian_filter(&samples.elevation, sigma);
        let gradient = compute_gradient(&samples.distance, &smoothed_elevation);
        let gradient_spline = CubicSpline::new(&samples.distance, &gradient)?;
        let friction_spline = CubicSpline::new(&samples.distance, &samples.friction)?;

        Ok(Self {
            samples,
            smoothed_elevation,
            gradient,
            sigma,
            gradient_spline,
            friction_spline,
        })
    }

    pub fn distance(&self) -> &[f64] {
        &self.samples.distance
    }

    pub fn elevation(&self) -> &[f64] {
        &self.samples.elevation
    }

    pub fn smoothed_elevation(&self) -> &[f64] {
        &self.smoothed_elevation
    }

    pub fn gradient(&self) -> &[f64] {
        &self.gradient
    }

    pub fn friction(&self) -> &[f64] {
        &self.samples.friction
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn start(&self) -> f64 {
        self.samples.distance[0]
    }

    pub fn finish(&self) -> f64 {
        self.samples.distance[self.samples.distance.len() - 1]
    }

    pub fn length(&self) -> f64 {
        self.finish() - self.start()
    }

    pub fn gradient_at(&self, x: f64) -> Result<f64> {
        self.gradient_spline.eval(x)
    }

    pub fn friction_at(&self, x: f64) -> Result<f64> {
        self.friction_spline.eval(x)
    }

    /// Gradient and its slope, with a flat run-out past either end.
    pub(crate) fn gradient_run_out(&self, x: f64) -> (f64, f64) {
        (
            self.gradient_spline.eval_clamped(x),
            self.gradient_spline.derivative_clamped(x),
        )
    }

    /// Friction and its slope, held at the end values past either end.
    pub(crate) fn friction_run_out(&self, x: f64) -> (f64, f64) {
        (
            self.friction_spline.eval_clamped(x),
            self.friction_spline.derivative_clamped(x),
        )
    }

    /// Remaining route from the first sample strictly past `position`,
    /// re-zeroed so the slice starts at distance 0.
    pub fn slice_from(&self, position: f64) -> Result<RouteSlice> {
        let distance = &self.samples.distance;
        let index = distance.partition_point(|&d| d <= position);
        if index + 1 >= distance.len() {
            return Err(PacingError::OutOfRange {
                x: position,
                lo: self.start(),
                hi: distance[distance.len().saturating_sub(2)],
            });
        }

        let offset = distance[index];
        let data = RouteData {
            distance: distance[index..].iter().map(|d| d - offset).collect(),
            elevation: self.samples.elevation[index..].to_vec(),
            friction: self.samples.friction[index..].to_vec(),
        };
        Ok(RouteSlice {
            profile: RouteProfile::with_smoothing(&data, self.sigma)?,
            offset,
        })
    }
}

/// A re-zeroed tail of a route and the distance it was cut at.
#[derive(Debug, Clone)]
pub struct RouteSlice {
    pub profile: RouteProfile,
    pub offset: f64,
}

/// Rise over run between consecutive samples; the last entry is 0.
pub fn compute_gradient(distance: &[f64], elevation: &[f64]) -> Vec<f64> {
    let mut gradient: Vec<f64> = distance
        .windows(2)
        .zip(elevation.windows(2))
        .map(|(d, e)| {
            let run = d[0] - d[1];
            if run != 0.0 {
                (e[0] - e[1]) / run
            } else {
                0.0
            }
        })
        .collect();
    gradient.push(0.0);
    gradient
}
