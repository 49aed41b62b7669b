//! Observation struct produced by the detector and consumed by the linker.

use serde::{Deserialize, Serialize};

use crate::utils::validate_position;
use crate::{Error, Result};

/// One candidate particle detected in one frame.
///
/// Observations are immutable once built: the validating constructor is the
/// only way to create one, and all fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Frame this observation was detected in.
    frame_index: usize,

    /// Sub-pixel centroid (x = column, y = row).
    position: [f64; 2],

    /// Integrated intensity under the feature.
    mass: f64,

    /// Radius of gyration in pixels.
    size: f64,

    /// Shape elongation, 0 = circular.
    eccentricity: f64,

    /// Peak intensity above background.
    signal: f64,
}

impl Observation {
    /// Create a new observation.
    ///
    /// # Arguments
    /// * `frame_index` - Frame the feature was found in
    /// * `x`, `y` - Sub-pixel position
    /// * `mass` - Integrated intensity (must be >= 0)
    /// * `size` - Characteristic radius (must be > 0)
    /// * `eccentricity` - Elongation in [0, 1]
    pub fn new(
        frame_index: usize,
        x: f64,
        y: f64,
        mass: f64,
        size: f64,
        eccentricity: f64,
    ) -> Result<Self> {
        let position = validate_position(x, y)?;

        if !mass.is_finite() || mass < 0.0 {
            return Err(Error::InvalidObservation(format!(
                "mass must be finite and non-negative, got {}",
                mass
            )));
        }
        if !size.is_finite() || size <= 0.0 {
            return Err(Error::InvalidObservation(format!(
                "size must be finite and positive, got {}",
                size
            )));
        }
        if !(0.0..=1.0).contains(&eccentricity) {
            return Err(Error::InvalidObservation(format!(
                "eccentricity must be in [0, 1], got {}",
                eccentricity
            )));
        }

        Ok(Self {
            frame_index,
            position,
            mass,
            size,
            eccentricity,
            signal: 0.0,
        })
    }

    /// Shorthand for a circular observation with unit size.
    ///
    /// Useful when observations come from an external detector that only
    /// reports position and mass.
    pub fn at(frame_index: usize, x: f64, y: f64, mass: f64) -> Result<Self> {
        Self::new(frame_index, x, y, mass, 1.0, 0.0)
    }

    /// Attach the peak signal measured by the detector.
    pub fn with_signal(mut self, signal: f64) -> Self {
        self.signal = signal.max(0.0);
        self
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Position as `(x, y)`.
    pub fn position(&self) -> (f64, f64) {
        (self.position[0], self.position[1])
    }

    pub fn x(&self) -> f64 {
        self.position[0]
    }

    pub fn y(&self) -> f64 {
        self.position[1]
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn eccentricity(&self) -> f64 {
        self.eccentricity
    }

    pub fn signal(&self) -> f64 {
        self.signal
    }

    /// Euclidean distance between the positions of two observations.
    pub fn distance_to(&self, other: &Observation) -> f64 {
        let dx = self.position[0] - other.position[0];
        let dy = self.position[1] - other.position[1];
        (dx * dx + dy * dy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_observation_new() {
        let obs = Observation::new(3, 10.5, 20.25, 500.0, 2.5, 0.1).unwrap();

        assert_eq!(obs.frame_index(), 3);
        assert_eq!(obs.position(), (10.5, 20.25));
        assert_relative_eq!(obs.mass(), 500.0);
        assert_relative_eq!(obs.size(), 2.5);
        assert_relative_eq!(obs.eccentricity(), 0.1);
        assert_relative_eq!(obs.signal(), 0.0);
    }

    #[test]
    fn test_observation_rejects_negative_mass() {
        assert!(Observation::new(0, 1.0, 1.0, -1.0, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_observation_rejects_non_positive_size() {
        assert!(Observation::new(0, 1.0, 1.0, 1.0, 0.0, 0.0).is_err());
        assert!(Observation::new(0, 1.0, 1.0, 1.0, -2.0, 0.0).is_err());
    }

    #[test]
    fn test_observation_rejects_bad_eccentricity() {
        assert!(Observation::new(0, 1.0, 1.0, 1.0, 1.0, 1.5).is_err());
        assert!(Observation::new(0, 1.0, 1.0, 1.0, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_observation_rejects_nan_position() {
        assert!(Observation::new(0, f64::NAN, 1.0, 1.0, 1.0, 0.0).is_err());
        assert!(Observation::at(0, 1.0, f64::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_distance_to() {
        let a = Observation::at(0, 0.0, 0.0, 1.0).unwrap();
        let b = Observation::at(1, 3.0, 4.0, 1.0).unwrap();
        assert_relative_eq!(a.distance_to(&b), 5.0, epsilon = 1e-12);
    }
}
