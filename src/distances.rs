//! Distance functions for matching observations to tracks.
//!
//! Linking predicts each track at its last known position (no velocity
//! extrapolation), so the cost of a pair is the plain distance between the
//! track's most recent observation and the candidate.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::{Observation, Track};

/// Distance metric between a track's last position and a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    /// L2 distance in the image plane.
    #[default]
    Euclidean,
    /// L-infinity distance (max of |dx|, |dy|).
    Chebyshev,
}

impl DistanceFunction {
    /// Distance between two observations.
    #[inline]
    pub fn distance(&self, a: &Observation, b: &Observation) -> f64 {
        let dx = a.x() - b.x();
        let dy = a.y() - b.y();
        match self {
            DistanceFunction::Euclidean => (dx * dx + dy * dy).sqrt(),
            DistanceFunction::Chebyshev => dx.abs().max(dy.abs()),
        }
    }

    /// Compute the cost matrix between tracks and candidates.
    ///
    /// # Returns
    /// Matrix of shape (n_candidates, n_tracks). Entry (i, j) is the distance
    /// between candidate i and the last observation of track j.
    pub fn get_distances(&self, tracks: &[&Track], candidates: &[Observation]) -> DMatrix<f64> {
        DMatrix::from_fn(candidates.len(), tracks.len(), |i, j| {
            self.distance(&candidates[i], tracks[j].last())
        })
    }
}

/// Get a distance function by name.
pub fn distance_by_name(name: &str) -> Option<DistanceFunction> {
    match name {
        "euclidean" => Some(DistanceFunction::Euclidean),
        "chebyshev" => Some(DistanceFunction::Chebyshev),
        _ => None,
    }
}
