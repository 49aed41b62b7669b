//! Trajectory quality filtering.
//!
//! Two independent accept conditions are combined with AND: a stub filter on
//! the observation count and an optional geometric gate on the net
//! displacement. Both are pure per-track predicates, so the filter is
//! order-independent and idempotent.

use serde::{Deserialize, Serialize};

use crate::kinematics::Axis;
use crate::{Error, Result, Track};

/// Bounds on a track's net displacement, in pixels.
///
/// Bounds are exclusive: a track is accepted when
/// `min_distance < d < max_distance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometricGate {
    /// Axis the displacement is measured along.
    #[serde(default)]
    pub axis: Axis,

    /// Tracks must travel further than this.
    #[serde(default)]
    pub min_distance: Option<f64>,

    /// Tracks must travel less than this (e.g. the channel width).
    #[serde(default)]
    pub max_distance: Option<f64>,

    /// Drop tracks moving against the expected flow direction.
    #[serde(default)]
    pub reject_negative: bool,
}

impl GeometricGate {
    /// Gate that only bounds the displacement from above.
    pub fn max(axis: Axis, max_distance: f64) -> Self {
        Self {
            axis,
            min_distance: None,
            max_distance: Some(max_distance),
            reject_negative: false,
        }
    }

    /// Gate that bounds the displacement on both sides.
    pub fn between(axis: Axis, min_distance: f64, max_distance: f64) -> Self {
        Self {
            axis,
            min_distance: Some(min_distance),
            max_distance: Some(max_distance),
            reject_negative: false,
        }
    }

    pub fn rejecting_negative(mut self) -> Self {
        self.reject_negative = true;
        self
    }

    /// Check one track against the gate.
    pub fn accepts(&self, track: &Track) -> bool {
        let d = self.axis.project(track.displacement());
        if self.reject_negative && d < 0.0 {
            return false;
        }
        if let Some(min) = self.min_distance {
            if d <= min {
                return false;
            }
        }
        if let Some(max) = self.max_distance {
            if d >= max {
                return false;
            }
        }
        true
    }

    pub fn validate(&self) -> Result<()> {
        for (name, bound) in [("min_distance", self.min_distance), ("max_distance", self.max_distance)] {
            if let Some(value) = bound {
                if !value.is_finite() {
                    return Err(Error::InvalidParameter(format!(
                        "{} must be finite, got {}",
                        name, value
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_distance, self.max_distance) {
            if min >= max {
                return Err(Error::InvalidParameter(format!(
                    "min_distance ({}) must be less than max_distance ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// Counts of what a filter pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub input: usize,
    pub stubs_removed: usize,
    pub gate_removed: usize,
}

impl FilterReport {
    pub fn kept(&self) -> usize {
        self.input - self.stubs_removed - self.gate_removed
    }
}

/// Stub filter plus optional geometric gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryFilter {
    /// Minimum number of observations a track must have.
    pub min_length: usize,

    /// Optional displacement bounds.
    #[serde(default)]
    pub gate: Option<GeometricGate>,
}

impl TrajectoryFilter {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: GeometricGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.validate()?;
        }
        Ok(())
    }

    /// True if the track has fewer observations than `min_length`.
    pub fn is_stub(&self, track: &Track) -> bool {
        track.len() < self.min_length
    }

    /// True if the track passes every accept condition.
    pub fn accepts(&self, track: &Track) -> bool {
        !self.is_stub(track) && self.gate.map_or(true, |g| g.accepts(track))
    }

    /// Keep accepted tracks, preserving order.
    pub fn apply(&self, tracks: Vec<Track>) -> Vec<Track> {
        self.apply_with_report(tracks).0
    }

    /// Keep accepted tracks and report why the others were dropped.
    ///
    /// A track failing both conditions is counted as a stub.
    pub fn apply_with_report(&self, tracks: Vec<Track>) -> (Vec<Track>, FilterReport) {
        let mut report = FilterReport {
            input: tracks.len(),
            ..FilterReport::default()
        };

        let kept = tracks
            .into_iter()
            .filter(|track| {
                if self.is_stub(track) {
                    report.stubs_removed += 1;
                    false
                } else if !self.gate.map_or(true, |g| g.accepts(track)) {
                    report.gate_removed += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        (kept, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observation;

    fn track(id: u64, xs: &[f64]) -> Track {
        let observations = xs
            .iter()
            .enumerate()
            .map(|(frame, &x)| Observation::at(frame, x, 0.0, 100.0).unwrap())
            .collect();
        Track::from_observations(id, observations).unwrap()
    }

    #[test]
    fn test_stub_filter() {
        let filter = TrajectoryFilter::new(3);
        let tracks = vec![track(0, &[0.0, 1.0]), track(1, &[0.0, 1.0, 2.0])];

        let (kept, report) = filter.apply_with_report(tracks);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].track_id(), 1);
        assert_eq!(report.stubs_removed, 1);
        assert_eq!(report.kept(), 1);
    }

    #[test]
    fn test_gate_rejects_beyond_channel_width() {
        let filter = TrajectoryFilter::new(3).with_gate(GeometricGate::max(Axis::X, 100.0));
        let tracks = vec![
            track(0, &[0.0, 60.0, 120.0]),
            track(1, &[0.0, 30.0, 60.0]),
        ];

        let (kept, report) = filter.apply_with_report(tracks);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].track_id(), 1);
        assert_eq!(report.gate_removed, 1);
    }

    #[test]
    fn test_gate_bounds_are_exclusive() {
        let gate = GeometricGate::between(Axis::X, 10.0, 30.0);
        assert!(!gate.accepts(&track(0, &[0.0, 10.0])));
        assert!(gate.accepts(&track(0, &[0.0, 20.0])));
        assert!(!gate.accepts(&track(0, &[0.0, 30.0])));
    }

    #[test]
    fn test_gate_rejects_negative_direction() {
        let gate = GeometricGate::max(Axis::X, 100.0).rejecting_negative();
        assert!(!gate.accepts(&track(0, &[50.0, 40.0])));
        assert!(gate.accepts(&track(0, &[40.0, 50.0])));

        // Without the flag, backwards motion passes an upper bound
        let lenient = GeometricGate::max(Axis::X, 100.0);
        assert!(lenient.accepts(&track(0, &[50.0, 40.0])));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let filter = TrajectoryFilter::new(2).with_gate(GeometricGate::between(Axis::X, 1.0, 50.0));
        let tracks = vec![
            track(0, &[0.0]),
            track(1, &[0.0, 5.0, 10.0]),
            track(2, &[0.0, 80.0]),
            track(3, &[0.0, 0.5]),
        ];

        let once = filter.apply(tracks);
        let twice = filter.apply(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 1);
    }

    #[test]
    fn test_gate_validation() {
        assert!(GeometricGate::between(Axis::X, 30.0, 10.0).validate().is_err());
        assert!(GeometricGate::max(Axis::X, f64::NAN).validate().is_err());
        assert!(GeometricGate::between(Axis::X, 10.0, 30.0).validate().is_ok());
    }
}
