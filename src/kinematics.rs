//! Per-track kinematics and population statistics.
//!
//! Sizes reported here are relative measurements. Upstream processing such
//! as background subtraction changes the apparent extent and brightness of a
//! cell, so `mean_size` and `area` compare cells within one video; they are
//! not absolute physical sizes and are not corrected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::KinematicsConfig;
use crate::utils::{mean, sample_std};
use crate::{Result, Track};

/// Full-scale value of 8-bit frames, used to turn mass into a pixel area.
pub const MASS_PER_PIXEL: f64 = 255.0;

/// Axis a displacement is measured along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Horizontal (flow direction in a horizontal channel). Signed.
    #[default]
    X,
    /// Vertical. Signed.
    Y,
    /// Straight-line distance. Never negative.
    Euclidean,
}

impl Axis {
    /// Project a displacement `(dx, dy)` onto this axis.
    #[inline]
    pub fn project(&self, (dx, dy): (f64, f64)) -> f64 {
        match self {
            Axis::X => dx,
            Axis::Y => dy,
            Axis::Euclidean => (dx * dx + dy * dy).sqrt(),
        }
    }
}

/// Per-observation quantity averaged into `TrackMetrics::mean_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSource {
    /// Radius of gyration.
    #[default]
    Size,
    /// Integrated intensity.
    Mass,
}

/// Summary of one surviving track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetrics {
    pub track_id: u64,
    pub start_frame: usize,
    pub end_frame: usize,
    pub n_observations: usize,
    /// Net distance in microns; signed for axis projections.
    pub distance: f64,
    /// Seconds between first and last observation; always > 0.
    pub transit_time: f64,
    /// Microns per second.
    pub velocity: f64,
    /// Mean of the configured size source. With `SizeSource::Mass` this is
    /// the raw mean mass, not a pixel count; see `area_px`.
    pub mean_size: f64,
    pub mean_mass: f64,
    pub mean_eccentricity: f64,
    /// Pixel area, `mean_mass / 255`.
    pub area_px: f64,
    /// `area_px` scaled to square microns.
    pub area: f64,
}

/// Result of reducing a batch of tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KinematicsReport {
    pub metrics: Vec<TrackMetrics>,
    /// Tracks with zero duration, excluded from `metrics`.
    pub degenerate: Vec<u64>,
}

/// Reduces tracks to physical metrics.
#[derive(Debug, Clone)]
pub struct KinematicsEngine {
    config: KinematicsConfig,
}

impl KinematicsEngine {
    pub fn new(config: KinematicsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &KinematicsConfig {
        &self.config
    }

    /// Compute metrics for one track.
    ///
    /// Returns `None` when the track has zero duration (first and last
    /// observation in the same frame), since velocity is undefined.
    pub fn compute(&self, track: &Track) -> Option<TrackMetrics> {
        let start_frame = track.first_frame();
        let end_frame = track.last_seen_frame();
        if end_frame == start_frame {
            return None;
        }

        let um = self.config.um_per_pixel;
        let distance = self.config.axis.project(track.displacement()) * um;
        let transit_time = (end_frame - start_frame) as f64 / self.config.fps;
        let velocity = distance / transit_time;

        let obs = track.observations();
        let masses: Vec<f64> = obs.iter().map(|o| o.mass()).collect();
        let sizes: Vec<f64> = obs.iter().map(|o| o.size()).collect();
        let eccentricities: Vec<f64> = obs.iter().map(|o| o.eccentricity()).collect();

        // Non-empty by construction of Track.
        let mean_mass = mean(&masses).unwrap_or(0.0);
        let mean_size = match self.config.size_source {
            SizeSource::Size => mean(&sizes).unwrap_or(0.0),
            SizeSource::Mass => mean_mass,
        };

        let area_px = mean_mass / MASS_PER_PIXEL;
        Some(TrackMetrics {
            track_id: track.track_id(),
            start_frame,
            end_frame,
            n_observations: track.len(),
            distance,
            transit_time,
            velocity,
            mean_size,
            mean_mass,
            mean_eccentricity: mean(&eccentricities).unwrap_or(0.0),
            area_px,
            area: area_px * um * um,
        })
    }

    /// Compute metrics for every track, counting degenerate ones.
    pub fn compute_all(&self, tracks: &[Track]) -> KinematicsReport {
        let mut report = KinematicsReport::default();
        for track in tracks {
            match self.compute(track) {
                Some(metrics) => report.metrics.push(metrics),
                None => {
                    debug!(
                        track_id = track.track_id(),
                        frame = track.first_frame(),
                        "zero-duration track excluded from velocity statistics"
                    );
                    report.degenerate.push(track.track_id());
                }
            }
        }
        report
    }
}

/// Dense `0..N-1` presentation index for each track id, in metrics order.
pub fn dense_ids(metrics: &[TrackMetrics]) -> HashMap<u64, usize> {
    metrics
        .iter()
        .enumerate()
        .map(|(index, m)| (m.track_id, index))
        .collect()
}

/// Descriptive statistics of one metric column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub count: usize,
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
    /// Sample standard deviation; `None` below two values.
    pub std: Option<f64>,
}

impl ColumnStats {
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            count: values.len(),
            min: values.iter().copied().reduce(f64::min),
            mean: mean(values),
            max: values.iter().copied().reduce(f64::max),
            std: sample_std(values),
        }
    }
}

/// Population statistics over a set of track metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub n_tracks: usize,
    pub transit_time: ColumnStats,
    pub distance: ColumnStats,
    pub velocity: ColumnStats,
    pub mean_size: ColumnStats,
    pub area_px: ColumnStats,
    pub area: ColumnStats,
    pub eccentricity: ColumnStats,
}

impl SummaryStatistics {
    pub fn from_metrics(metrics: &[TrackMetrics]) -> Self {
        let column = |f: fn(&TrackMetrics) -> f64| -> ColumnStats {
            let values: Vec<f64> = metrics.iter().map(f).collect();
            ColumnStats::from_values(&values)
        };

        Self {
            n_tracks: metrics.len(),
            transit_time: column(|m| m.transit_time),
            distance: column(|m| m.distance),
            velocity: column(|m| m.velocity),
            mean_size: column(|m| m.mean_size),
            area_px: column(|m| m.area_px),
            area: column(|m| m.area),
            eccentricity: column(|m| m.mean_eccentricity),
        }
    }
}
