//! Validated configuration for every pipeline stage.
//!
//! All parameters are checked before the first frame is processed, so a bad
//! value fails the run up front with `Error::InvalidParameter` instead of
//! surfacing halfway through a video. Configurations round-trip through JSON
//! and can be built from the per-application presets.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distances::{distance_by_name, DistanceFunction};
use crate::kinematics::{Axis, SizeSource};
use crate::linker::AdaptiveSearch;
use crate::trajectory_filter::{GeometricGate, TrajectoryFilter};
use crate::utils::is_positive_finite;
use crate::{Error, Result};

/// Feature detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Maximum feature diameter in pixels; odd and > 1.
    pub diameter: usize,

    /// Minimum integrated intensity for a feature to be kept.
    pub min_mass: f64,

    /// Features with mass at or above this value are dropped (merged/over-bright blobs).
    pub max_mass: Option<f64>,

    /// True for dark features on a light background.
    pub invert: bool,

    /// Gaussian smoothing length scale in pixels.
    pub noise_size: f64,

    /// Minimum separation between features; defaults to `diameter + 1`.
    pub separation: Option<f64>,

    /// Local maxima must be brighter than this percentile of the processed frame.
    pub percentile: f64,

    /// Maximum centroid refinement iterations.
    pub max_iterations: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            diameter: 15,
            min_mass: 1000.0,
            max_mass: None,
            invert: false,
            noise_size: 1.0,
            separation: None,
            percentile: 64.0,
            max_iterations: 10,
        }
    }
}

impl DetectorConfig {
    /// Create a detector configuration with default tuning.
    ///
    /// # Arguments
    /// * `diameter` - Maximum feature diameter (odd integer > 1)
    /// * `min_mass` - Minimum integrated intensity
    pub fn new(diameter: usize, min_mass: f64) -> Self {
        Self {
            diameter,
            min_mass,
            ..Self::default()
        }
    }

    /// Radius of the feature mask, `diameter / 2` rounded down.
    pub fn radius(&self) -> usize {
        self.diameter / 2
    }

    /// Effective minimum separation between features.
    pub fn effective_separation(&self) -> f64 {
        self.separation.unwrap_or((self.diameter + 1) as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.diameter <= 1 || self.diameter % 2 == 0 {
            return Err(Error::InvalidParameter(format!(
                "diameter must be an odd integer > 1, got {}",
                self.diameter
            )));
        }
        if !self.min_mass.is_finite() || self.min_mass < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "min_mass must be non-negative, got {}",
                self.min_mass
            )));
        }
        if let Some(max_mass) = self.max_mass {
            if !max_mass.is_finite() || max_mass <= self.min_mass {
                return Err(Error::InvalidParameter(format!(
                    "max_mass must be greater than min_mass ({}), got {}",
                    self.min_mass, max_mass
                )));
            }
        }
        if !self.noise_size.is_finite() || self.noise_size < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "noise_size must be non-negative, got {}",
                self.noise_size
            )));
        }
        if let Some(separation) = self.separation {
            if !is_positive_finite(separation) {
                return Err(Error::InvalidParameter(format!(
                    "separation must be positive, got {}",
                    separation
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(Error::InvalidParameter(format!(
                "percentile must be in [0, 100], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

/// Linking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Maximum allowed inter-frame displacement, pixels.
    pub search_range: f64,

    /// Consecutive unmatched frames a track survives.
    pub memory: usize,

    /// Cost between a track's last position and a candidate.
    #[serde(default)]
    pub distance_function: DistanceFunction,

    /// Optional adaptive shrinking of the search range for dense frames.
    #[serde(default)]
    pub adaptive: Option<AdaptiveSearch>,
}

impl LinkerConfig {
    pub fn new(search_range: f64, memory: usize) -> Self {
        Self {
            search_range,
            memory,
            distance_function: DistanceFunction::Euclidean,
            adaptive: None,
        }
    }

    /// Create a linker configuration from a distance function name.
    pub fn from_distance_name(name: &str, search_range: f64, memory: usize) -> Result<Self> {
        let distance_function = distance_by_name(name).ok_or_else(|| {
            Error::InvalidParameter(format!("unknown distance function: {}", name))
        })?;
        Ok(Self {
            distance_function,
            ..Self::new(search_range, memory)
        })
    }

    pub fn with_adaptive(mut self, adaptive: AdaptiveSearch) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.search_range.is_finite() || self.search_range < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "search_range must be non-negative, got {}",
                self.search_range
            )));
        }
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate()?;
        }
        Ok(())
    }
}

/// Physical-unit conversion and metric selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicsConfig {
    /// Imaging rate, frames per second.
    pub fps: f64,

    /// Microns per pixel.
    pub um_per_pixel: f64,

    /// Axis the distance is measured along.
    #[serde(default)]
    pub axis: Axis,

    /// Per-observation quantity averaged into `mean_size`.
    #[serde(default)]
    pub size_source: SizeSource,
}

impl KinematicsConfig {
    pub fn new(fps: f64, um_per_pixel: f64) -> Self {
        Self {
            fps,
            um_per_pixel,
            axis: Axis::X,
            size_source: SizeSource::Size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_positive_finite(self.fps) {
            return Err(Error::InvalidParameter(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if !is_positive_finite(self.um_per_pixel) {
            return Err(Error::InvalidParameter(format!(
                "um_per_pixel must be positive, got {}",
                self.um_per_pixel
            )));
        }
        Ok(())
    }
}

/// Complete configuration of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub linker: LinkerConfig,
    pub filter: TrajectoryFilter,
    pub kinematics: KinematicsConfig,

    /// Detect frames concurrently before linking.
    #[serde(default)]
    pub parallel_detection: bool,
}

impl PipelineConfig {
    /// Validate every stage.
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.linker.validate()?;
        self.filter.validate()?;
        self.kinematics.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize to pretty JSON (for recording run parameters next to results).
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Transient adhesion timing on light-on-dark video.
    ///
    /// Cells may travel at most a tenth of the channel per frame, may vanish
    /// for three frames, must be seen for ten, and must not travel further
    /// than the channel itself.
    pub fn transient_adhesion(channel_width: f64, fps: f64, um_per_pixel: f64) -> Self {
        Self {
            detector: DetectorConfig {
                max_mass: Some(2500.0),
                ..DetectorConfig::new(15, 1000.0)
            },
            linker: LinkerConfig::new(channel_width / 10.0, 3)
                .with_adaptive(AdaptiveSearch::default()),
            filter: TrajectoryFilter::new(10).with_gate(GeometricGate {
                axis: Axis::X,
                min_distance: None,
                max_distance: Some(channel_width),
                reject_negative: false,
            }),
            kinematics: KinematicsConfig {
                axis: Axis::X,
                size_source: SizeSource::Mass,
                ..KinematicsConfig::new(fps, um_per_pixel)
            },
            parallel_detection: false,
        }
    }

    /// Specialized deformability index through a constriction channel.
    ///
    /// Tracks must cross between a third of the channel and the full channel.
    pub fn deformability(channel_width: f64, fps: f64, um_per_pixel: f64) -> Self {
        Self {
            detector: DetectorConfig::new(15, 1000.0),
            linker: LinkerConfig::new(channel_width / 3.0, 1)
                .with_adaptive(AdaptiveSearch::default()),
            filter: TrajectoryFilter::new(3).with_gate(GeometricGate {
                axis: Axis::X,
                min_distance: Some(channel_width / 3.0),
                max_distance: Some(channel_width),
                reject_negative: false,
            }),
            kinematics: KinematicsConfig {
                axis: Axis::X,
                size_source: SizeSource::Mass,
                ..KinematicsConfig::new(fps, um_per_pixel)
            },
            parallel_detection: false,
        }
    }

    /// Fluorescence single-cell tracking with free 2D motion.
    pub fn single_cell_fluorescence(
        search_range: f64,
        min_distance: f64,
        fps: f64,
        um_per_pixel: f64,
    ) -> Self {
        Self {
            detector: DetectorConfig::new(15, 3000.0),
            linker: LinkerConfig::new(search_range, 3),
            filter: TrajectoryFilter::new(3).with_gate(GeometricGate {
                axis: Axis::Euclidean,
                min_distance: Some(min_distance),
                max_distance: None,
                reject_negative: false,
            }),
            kinematics: KinematicsConfig {
                axis: Axis::Euclidean,
                size_source: SizeSource::Size,
                ..KinematicsConfig::new(fps, um_per_pixel)
            },
            parallel_detection: false,
        }
    }

    /// Brightfield adhesion counting; cells are usually dark on a light field.
    ///
    /// Cells are stationary, so tracking parameters are permissive and the
    /// detector output is what matters.
    pub fn brightfield(invert: bool, min_mass: f64, um_per_pixel: f64) -> Self {
        Self {
            detector: DetectorConfig {
                invert,
                ..DetectorConfig::new(15, min_mass)
            },
            linker: LinkerConfig::new(5.0, 0),
            filter: TrajectoryFilter::new(1),
            kinematics: KinematicsConfig::new(1.0, um_per_pixel),
            parallel_detection: false,
        }
    }
}
