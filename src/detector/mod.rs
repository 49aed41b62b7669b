//! Feature detection in grayscale frames.
//!
//! `Detector::locate` finds round, blob-like features of a known maximum
//! diameter in one frame:
//!
//! 1. optional inversion for dark cells on a light background,
//! 2. band-pass filtering (`preprocess`),
//! 3. local maxima above a percentile threshold,
//! 4. iterative centroid refinement and characterisation (`features`),
//! 5. mass thresholds and removal of features closer than half the
//!    separation.
//!
//! Detection is a pure function of the frame and the configuration, so frames
//! can be processed in any order or concurrently (`Detector::batch`).

pub mod features;
pub mod preprocess;

use ndarray::{Array2, ArrayView2};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::DetectorConfig;
use crate::{Observation, Result};

use features::Feature;

/// Locates features in frames according to a validated `DetectorConfig`.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    /// Create a detector, validating the configuration.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Locate all features in one frame.
    ///
    /// # Arguments
    /// * `frame_index` - Index stamped on every returned observation
    /// * `image` - Grayscale frame, rows by columns
    ///
    /// # Returns
    /// Observations sorted by `(y, x)`; empty for frames smaller than the
    /// feature diameter or without any structure.
    pub fn locate(&self, frame_index: usize, image: &ArrayView2<f64>) -> Vec<Observation> {
        let (nrows, ncols) = image.dim();
        let diameter = self.config.diameter;
        if nrows < diameter || ncols < diameter {
            return Vec::new();
        }

        let inverted;
        let raw = if self.config.invert {
            inverted = preprocess::invert(image);
            inverted.view()
        } else {
            image.view()
        };

        let radius = self.config.radius();
        let processed = preprocess::bandpass(&raw, self.config.noise_size, 2 * radius + 1);
        let view = processed.view();
        let threshold = match preprocess::percentile(&view, self.config.percentile) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let separation = self.config.effective_separation();
        let candidates = features::local_maxima(&view, separation / 2.0, threshold, radius);

        let located: Vec<Feature> = candidates
            .into_iter()
            .filter_map(|peak| {
                let (center, position) =
                    features::refine(&view, peak, radius, self.config.max_iterations);
                features::characterize(&view, center, position, radius)
            })
            .filter(|f| self.mass_in_range(f.mass))
            .collect();

        let mut kept = features::drop_close(located, separation / 2.0);
        kept.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

        kept.into_iter()
            .filter_map(|f| {
                Observation::new(frame_index, f.x, f.y, f.mass, f.size, f.eccentricity)
                    .ok()
                    .map(|obs| obs.with_signal(f.signal))
            })
            .collect()
    }

    /// Locate features in an 8-bit frame.
    pub fn locate_u8(&self, frame_index: usize, image: &ArrayView2<u8>) -> Vec<Observation> {
        let frame: Array2<f64> = image.mapv(f64::from);
        self.locate(frame_index, &frame.view())
    }

    /// Locate features in every frame; frame indices follow slice order.
    ///
    /// With `parallel` set (and the `parallel` feature enabled) frames are
    /// processed concurrently. Results are always returned in frame order.
    pub fn batch(&self, frames: &[Array2<f64>], parallel: bool) -> Vec<Vec<Observation>> {
        #[cfg(feature = "parallel")]
        {
            if parallel {
                return frames
                    .par_iter()
                    .enumerate()
                    .map(|(index, frame)| self.locate(index, &frame.view()))
                    .collect();
            }
        }

        #[cfg(not(feature = "parallel"))]
        {
            if parallel {
                crate::utils::warn_once(
                    "parallel detection requested but the `parallel` feature is disabled; running sequentially",
                );
            }
        }

        frames
            .iter()
            .enumerate()
            .map(|(index, frame)| self.locate(index, &frame.view()))
            .collect()
    }

    /// Mass thresholds: `min_mass <= mass`, and `mass < max_mass` when set.
    fn mass_in_range(&self, mass: f64) -> bool {
        mass >= self.config.min_mass && self.config.max_mass.map_or(true, |max| mass < max)
    }
}
