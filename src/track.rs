//! Track struct for observation chains maintained by the linker.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Observation;

/// Counter handing out track identities for one linking run.
///
/// Lives inside a single `Linker`, so identities are unique per run and
/// restart at 0 for every new run.
#[derive(Debug, Default, Clone)]
pub struct TrackIdFactory {
    next_id: u64,
}

impl TrackIdFactory {
    /// Create a new factory starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the next track id.
    #[inline]
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.next_id
    }
}

/// An ordered, frame-monotonic chain of observations sharing one identity.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Identity, unique for the lifetime of one run.
    track_id: u64,

    /// Observations in strictly increasing frame order.
    observations: Vec<Observation>,

    /// True while the track is still eligible for extension.
    active: bool,

    /// Consecutive frames without a match.
    frames_unmatched: usize,
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("track_id", &self.track_id)
            .field("len", &self.observations.len())
            .field("first_frame", &self.first_frame())
            .field("last_seen_frame", &self.last_seen_frame())
            .field("active", &self.active)
            .field("frames_unmatched", &self.frames_unmatched)
            .finish()
    }
}

impl Track {
    /// Start a new active track from its first observation.
    pub(crate) fn start(track_id: u64, first: Observation) -> Self {
        Self {
            track_id,
            observations: vec![first],
            active: true,
            frames_unmatched: 0,
        }
    }

    /// Build a finished track from an existing chain.
    ///
    /// Returns `None` for an empty chain or frame indices that are not
    /// strictly increasing. Used for re-analysing stored tracks.
    pub fn from_observations(track_id: u64, observations: Vec<Observation>) -> Option<Self> {
        if observations.is_empty() {
            return None;
        }
        let monotonic = observations
            .windows(2)
            .all(|w| w[0].frame_index() < w[1].frame_index());
        if !monotonic {
            return None;
        }
        Some(Self {
            track_id,
            observations,
            active: false,
            frames_unmatched: 0,
        })
    }

    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn frames_unmatched(&self) -> usize {
        self.frames_unmatched
    }

    /// First observation of the chain.
    pub fn first(&self) -> &Observation {
        // Non-empty by construction.
        &self.observations[0]
    }

    /// Most recent observation of the chain.
    pub fn last(&self) -> &Observation {
        &self.observations[self.observations.len() - 1]
    }

    pub fn first_frame(&self) -> usize {
        self.first().frame_index()
    }

    /// Frame index of the most recent observation.
    pub fn last_seen_frame(&self) -> usize {
        self.last().frame_index()
    }

    /// Net displacement `(dx, dy)` from first to last observation, in pixels.
    pub fn displacement(&self) -> (f64, f64) {
        let (x0, y0) = self.first().position();
        let (x1, y1) = self.last().position();
        (x1 - x0, y1 - y0)
    }

    /// Append a matched observation and reset the gap counter.
    ///
    /// Returns false (and leaves the track untouched) if the track is inactive
    /// or the observation does not advance the frame index.
    pub(crate) fn extend(&mut self, observation: Observation) -> bool {
        if !self.active || observation.frame_index() <= self.last_seen_frame() {
            return false;
        }
        self.observations.push(observation);
        self.frames_unmatched = 0;
        true
    }

    /// Record `frames` unmatched frames; deactivates the track once the gap
    /// exceeds `memory`. Returns true if the track is still active.
    pub(crate) fn miss(&mut self, frames: usize, memory: usize) -> bool {
        self.frames_unmatched += frames;
        if self.frames_unmatched > memory {
            self.active = false;
        }
        self.active
    }

    /// Mark the track as finished.
    pub(crate) fn retire(&mut self) {
        self.active = false;
    }
}
