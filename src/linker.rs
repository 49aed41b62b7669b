//! Frame-to-frame linker.
//!
//! Consumes per-frame observation sets in increasing frame order and chains
//! them into tracks by greedy nearest-neighbour assignment, with a bounded
//! search range and a short memory for closing gaps.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LinkerConfig;
use crate::matching::{
    get_unmatched, is_ambiguous, match_candidates_and_tracks, subnets, validate_distance_matrix,
};
use crate::track::TrackIdFactory;
use crate::utils::warn_once;
use crate::{Error, Observation, Result, Track};

/// Adaptive search-range policy for dense frames.
///
/// The candidate graph of a frame is split into subnets of tracks and
/// candidates joined by in-range distances. Only a subnet that is ambiguous
/// has its range multiplied by `step`, and it is split again at the smaller
/// range, until every piece is unambiguous or another shrink would fall
/// below `stop`. Other subnets keep the full range. The range is reset for
/// every frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSearch {
    /// Shrink factor applied per iteration, in (0, 1).
    pub step: f64,
    /// Smallest search range the policy may reach, > 0.
    pub stop: f64,
}

impl AdaptiveSearch {
    pub fn new(step: f64, stop: f64) -> Self {
        Self { step, stop }
    }

    /// Validate the policy parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.step > 0.0 && self.step < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "adaptive step must be in (0, 1), got {}",
                self.step
            )));
        }
        if !(self.stop.is_finite() && self.stop > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "adaptive stop must be positive, got {}",
                self.stop
            )));
        }
        Ok(())
    }
}

impl Default for AdaptiveSearch {
    fn default() -> Self {
        Self {
            step: 0.95,
            stop: 1.0,
        }
    }
}

/// Per-frame bookkeeping, kept for logging and inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame_index: usize,
    pub observations: usize,
    pub linked: usize,
    pub started: usize,
    pub retired: usize,
    /// Smallest search range applied to any subnet in this frame.
    pub search_range: f64,
}

/// Greedy nearest-neighbour linker.
///
/// Owns the active-track table for one run. Frames must be fed in strictly
/// increasing order; skipped frame indices count as frames with no
/// observations.
pub struct Linker {
    /// Linker configuration.
    pub config: LinkerConfig,

    /// Tracks still eligible for extension.
    active: Vec<Track>,

    /// Tracks that exceeded their memory, in retirement order.
    finished: Vec<Track>,

    /// Track identity counter.
    ids: TrackIdFactory,

    /// Last frame index passed to `update`.
    last_frame: Option<usize>,

    /// Stats of the most recent frame.
    last_stats: Option<FrameStats>,
}

impl Linker {
    /// Create a new linker with the given configuration.
    pub fn new(config: LinkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            active: Vec::new(),
            finished: Vec::new(),
            ids: TrackIdFactory::new(),
            last_frame: None,
            last_stats: None,
        })
    }

    /// Link one frame of observations.
    ///
    /// # Arguments
    /// * `frame_index` - Index of this frame, strictly greater than the previous one
    /// * `observations` - Observations detected in this frame
    ///
    /// # Returns
    /// Tracks still active after this frame
    pub fn update(
        &mut self,
        frame_index: usize,
        observations: Vec<Observation>,
    ) -> Result<Vec<&Track>> {
        if let Some(previous) = self.last_frame {
            if frame_index <= previous {
                return Err(Error::FrameOrder {
                    previous,
                    current: frame_index,
                });
            }
        }
        if let Some(stray) = observations.iter().find(|o| o.frame_index() != frame_index) {
            return Err(Error::InvalidObservation(format!(
                "observation from frame {} passed to linker for frame {}",
                stray.frame_index(),
                frame_index
            )));
        }

        // Frames skipped in the numbering had nothing to match.
        let skipped = self
            .last_frame
            .map(|previous| frame_index - previous - 1)
            .unwrap_or(0);
        let mut retired = 0;
        if skipped > 0 {
            let memory = self.config.memory;
            for track in &mut self.active {
                track.miss(skipped, memory);
            }
            retired += self.retire_inactive();
        }
        self.last_frame = Some(frame_index);

        // Cost of every active track against every observation
        let track_refs: Vec<&Track> = self.active.iter().collect();
        let track_ids: Vec<u64> = track_refs.iter().map(|t| t.track_id()).collect();
        let distance_matrix = self
            .config
            .distance_function
            .get_distances(&track_refs, &observations);
        validate_distance_matrix(&distance_matrix)?;

        let (matched_obs, matched_tracks, search_range) =
            self.assign(&distance_matrix, &track_ids);
        let unmatched_tracks = get_unmatched(self.active.len(), &matched_tracks);
        let unmatched_obs = get_unmatched(observations.len(), &matched_obs);

        // Move matched observations into their tracks
        let mut slots: Vec<Option<Observation>> = observations.into_iter().map(Some).collect();
        for (&obs_idx, &track_idx) in matched_obs.iter().zip(matched_tracks.iter()) {
            if let Some(obs) = slots[obs_idx].take() {
                let extended = self.active[track_idx].extend(obs);
                debug_assert!(extended, "active track refused a later observation");
            }
        }

        // Tracks left unmatched this frame age by one
        let memory = self.config.memory;
        for &track_idx in &unmatched_tracks {
            self.active[track_idx].miss(1, memory);
        }
        retired += self.retire_inactive();

        // Leftover observations start new tracks, in detection order
        let started = unmatched_obs.len();
        for obs_idx in unmatched_obs {
            if let Some(obs) = slots[obs_idx].take() {
                let id = self.ids.next_id();
                self.active.push(Track::start(id, obs));
            }
        }

        let stats = FrameStats {
            frame_index,
            observations: slots.len(),
            linked: matched_obs.len(),
            started,
            retired,
            search_range,
        };
        debug!(
            frame = stats.frame_index,
            observations = stats.observations,
            linked = stats.linked,
            started = stats.started,
            retired = stats.retired,
            search_range = stats.search_range,
            "linked frame"
        );
        self.last_stats = Some(stats);

        Ok(self.active.iter().collect())
    }

    /// Link a whole sequence where position `i` holds the observations of frame `i`.
    pub fn link_frames<I>(&mut self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = Vec<Observation>>,
    {
        let start = self.last_frame.map(|f| f + 1).unwrap_or(0);
        for (offset, observations) in frames.into_iter().enumerate() {
            self.update(start + offset, observations)?;
        }
        Ok(())
    }

    /// End the sequence: retire every remaining track and return all tracks
    /// ordered by `track_id`.
    pub fn finish(mut self) -> Vec<Track> {
        for track in &mut self.active {
            track.retire();
        }
        let mut tracks = std::mem::take(&mut self.finished);
        tracks.append(&mut self.active);
        tracks.sort_by_key(|t| t.track_id());
        tracks
    }

    /// Tracks still eligible for extension.
    pub fn active_tracks(&self) -> &[Track] {
        &self.active
    }

    /// Tracks already finalized for the frames processed so far.
    pub fn finished_tracks(&self) -> &[Track] {
        &self.finished
    }

    /// Total number of tracks created in this run.
    pub fn total_track_count(&self) -> u64 {
        self.ids.issued()
    }

    /// Stats of the most recently linked frame.
    pub fn last_stats(&self) -> Option<&FrameStats> {
        self.last_stats.as_ref()
    }

    // Internal: greedy assignment, with the adaptive policy applied per subnet.
    // Returns matched candidates, matched track columns and the smallest range used.
    fn assign(
        &self,
        distance_matrix: &DMatrix<f64>,
        track_ids: &[u64],
    ) -> (Vec<usize>, Vec<usize>, f64) {
        let range = self.config.search_range;
        let Some(adaptive) = self.config.adaptive else {
            let (obs, tracks) = match_candidates_and_tracks(distance_matrix, track_ids, range);
            return (obs, tracks, range);
        };

        let mut matched_obs = Vec::new();
        let mut matched_tracks = Vec::new();
        let used = match_adaptive(
            distance_matrix,
            track_ids,
            range,
            adaptive,
            &mut matched_obs,
            &mut matched_tracks,
        );
        (matched_obs, matched_tracks, used)
    }

    // Internal: move deactivated tracks to the finished list
    fn retire_inactive(&mut self) -> usize {
        let before = self.finished.len();
        let (still_active, done): (Vec<Track>, Vec<Track>) =
            self.active.drain(..).partition(|t| t.is_active());
        self.active = still_active;
        self.finished.extend(done);
        self.finished.len() - before
    }
}

/// Match every subnet of `distance_matrix` at `range`, recursing with a
/// smaller range into subnets that are still ambiguous.
///
/// Indices pushed to `matched_obs` and `matched_tracks` refer to rows and
/// columns of `distance_matrix`. Returns the smallest range applied.
fn match_adaptive(
    distance_matrix: &DMatrix<f64>,
    track_ids: &[u64],
    range: f64,
    adaptive: AdaptiveSearch,
    matched_obs: &mut Vec<usize>,
    matched_tracks: &mut Vec<usize>,
) -> f64 {
    let mut smallest = range;
    for subnet in subnets(distance_matrix, range) {
        let local = subnet.distances(distance_matrix);
        let local_ids: Vec<u64> = subnet.tracks.iter().map(|&col| track_ids[col]).collect();

        let next = range * adaptive.step;
        let (obs, tracks) = if !is_ambiguous(&local, range) {
            match_candidates_and_tracks(&local, &local_ids, range)
        } else if next < adaptive.stop {
            warn_once("adaptive search range reached its floor; ambiguous links remain");
            match_candidates_and_tracks(&local, &local_ids, range)
        } else {
            let mut obs = Vec::new();
            let mut tracks = Vec::new();
            let used = match_adaptive(&local, &local_ids, next, adaptive, &mut obs, &mut tracks);
            smallest = smallest.min(used);
            (obs, tracks)
        };

        matched_obs.extend(obs.into_iter().map(|i| subnet.candidates[i]));
        matched_tracks.extend(tracks.into_iter().map(|j| subnet.tracks[j]));
    }
    smallest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distances::DistanceFunction;

    fn config(search_range: f64, memory: usize) -> LinkerConfig {
        LinkerConfig {
            search_range,
            memory,
            distance_function: DistanceFunction::Euclidean,
            adaptive: None,
        }
    }

    fn obs(frame: usize, x: f64, y: f64) -> Observation {
        Observation::at(frame, x, y, 500.0).unwrap()
    }

    // ===== Basic Linker Tests =====

    #[test]
    fn test_linker_new() {
        let linker = Linker::new(config(5.0, 1)).unwrap();
        assert!(linker.active_tracks().is_empty());
        assert_eq!(linker.total_track_count(), 0);
    }

    #[test]
    fn test_linker_invalid_config() {
        assert!(Linker::new(config(-1.0, 1)).is_err());
        assert!(Linker::new(config(f64::NAN, 1)).is_err());
    }

    #[test]
    fn test_single_particle_three_frames() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker.update(0, vec![obs(0, 10.0, 10.0)]).unwrap();
        linker.update(1, vec![obs(1, 12.0, 10.0)]).unwrap();
        linker.update(2, vec![obs(2, 14.0, 10.0)]).unwrap();

        let tracks = linker.finish();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].len(), 3);
        assert_eq!(tracks[0].track_id(), 0);
        assert!(!tracks[0].is_active());
    }

    #[test]
    fn test_out_of_range_starts_new_track() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker.update(1, vec![obs(1, 6.0, 0.0)]).unwrap();

        let tracks = linker.finish();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.len() == 1));
    }

    #[test]
    fn test_empty_frames_are_valid() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        assert!(linker.update(0, vec![]).unwrap().is_empty());
        assert!(linker.update(1, vec![]).unwrap().is_empty());
        assert!(linker.finish().is_empty());
    }

    // ===== Memory =====

    #[test]
    fn test_memory_closes_short_gap() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker.update(1, vec![]).unwrap();
        linker.update(2, vec![obs(2, 1.0, 0.0)]).unwrap();

        let tracks = linker.finish();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].len(), 2);
    }

    #[test]
    fn test_gap_longer_than_memory_splits_track() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        for frame in 1..5 {
            linker.update(frame, vec![]).unwrap();
        }
        linker.update(5, vec![obs(5, 0.0, 0.0)]).unwrap();

        let tracks = linker.finish();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].last_seen_frame(), 0);
        assert_eq!(tracks[1].first_frame(), 5);
    }

    #[test]
    fn test_skipped_frame_numbers_count_as_gaps() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker.update(5, vec![obs(5, 0.0, 0.0)]).unwrap();
        assert_eq!(linker.finished_tracks().len(), 1);
        assert_eq!(linker.finish().len(), 2);
    }

    #[test]
    fn test_memory_zero_requires_consecutive_frames() {
        let mut linker = Linker::new(config(5.0, 0)).unwrap();
        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker.update(1, vec![]).unwrap();
        linker.update(2, vec![obs(2, 0.0, 0.0)]).unwrap();
        assert_eq!(linker.finish().len(), 2);
    }

    // ===== Ordering =====

    #[test]
    fn test_rejects_out_of_order_frames() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker.update(3, vec![]).unwrap();
        assert!(matches!(
            linker.update(3, vec![]),
            Err(Error::FrameOrder { previous: 3, current: 3 })
        ));
        assert!(linker.update(2, vec![]).is_err());
    }

    #[test]
    fn test_rejects_observation_from_other_frame() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        assert!(linker.update(0, vec![obs(1, 0.0, 0.0)]).is_err());
    }

    // ===== Assignment =====

    #[test]
    fn test_two_particles_keep_identity() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker
            .update(0, vec![obs(0, 0.0, 0.0), obs(0, 50.0, 0.0)])
            .unwrap();
        // Reversed detection order must not swap identities
        linker
            .update(1, vec![obs(1, 52.0, 0.0), obs(1, 2.0, 0.0)])
            .unwrap();

        let tracks = linker.finish();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].last().x(), 2.0);
        assert_eq!(tracks[1].last().x(), 52.0);
    }

    #[test]
    fn test_equidistant_tie_goes_to_lower_id() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker
            .update(0, vec![obs(0, 0.0, 0.0), obs(0, 4.0, 0.0)])
            .unwrap();
        linker.update(1, vec![obs(1, 2.0, 0.0)]).unwrap();

        let tracks = linker.finish();
        assert_eq!(tracks[0].len(), 2);
        assert_eq!(tracks[1].len(), 1);
    }

    #[test]
    fn test_link_frames() {
        let mut linker = Linker::new(config(5.0, 1)).unwrap();
        linker
            .link_frames(vec![
                vec![obs(0, 0.0, 0.0)],
                vec![obs(1, 1.0, 0.0)],
                vec![obs(2, 2.0, 0.0)],
            ])
            .unwrap();
        let stats = *linker.last_stats().unwrap();
        assert_eq!(stats.frame_index, 2);
        assert_eq!(stats.linked, 1);
        assert_eq!(linker.finish()[0].len(), 3);
    }

    // ===== Adaptive search =====

    #[test]
    fn test_adaptive_shrinks_on_ambiguity() {
        let mut cfg = config(10.0, 1);
        cfg.adaptive = Some(AdaptiveSearch::new(0.5, 1.0));
        let mut linker = Linker::new(cfg).unwrap();

        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker
            .update(1, vec![obs(1, 2.0, 0.0), obs(1, 8.0, 0.0)])
            .unwrap();

        // 10 -> 5 resolves the ambiguity
        let stats = *linker.last_stats().unwrap();
        assert_eq!(stats.search_range, 5.0);
        assert_eq!(stats.linked, 1);
    }

    #[test]
    fn test_adaptive_stops_at_floor() {
        let mut cfg = config(10.0, 1);
        cfg.adaptive = Some(AdaptiveSearch::new(0.5, 4.0));
        let mut linker = Linker::new(cfg).unwrap();

        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker
            .update(1, vec![obs(1, 1.0, 0.0), obs(1, 2.0, 0.0)])
            .unwrap();

        // 10 -> 5, next shrink (2.5) is below the floor
        let stats = *linker.last_stats().unwrap();
        assert_eq!(stats.search_range, 5.0);
        assert_eq!(stats.linked, 1);
    }

    #[test]
    fn test_adaptive_leaves_sparse_frames_alone() {
        let mut cfg = config(10.0, 1);
        cfg.adaptive = Some(AdaptiveSearch::default());
        let mut linker = Linker::new(cfg).unwrap();

        linker.update(0, vec![obs(0, 0.0, 0.0)]).unwrap();
        linker.update(1, vec![obs(1, 9.0, 0.0)]).unwrap();
        assert_eq!(linker.last_stats().unwrap().search_range, 10.0);
        assert_eq!(linker.finish().len(), 1);
    }

    #[test]
    fn test_adaptive_shrinks_only_the_dense_subnet() {
        let mut cfg = config(30.0, 1);
        cfg.adaptive = Some(AdaptiveSearch::default());
        let mut linker = Linker::new(cfg).unwrap();

        // A fast isolated cell far from a close pair
        linker
            .update(
                0,
                vec![obs(0, 0.0, 0.0), obs(0, 300.0, 300.0), obs(0, 304.0, 300.0)],
            )
            .unwrap();
        linker
            .update(
                1,
                vec![obs(1, 20.0, 0.0), obs(1, 301.0, 300.0), obs(1, 305.0, 300.0)],
            )
            .unwrap();

        // The pair shrinks below its cross distance of 3 px; the fast cell
        // still links at 20 px
        let stats = *linker.last_stats().unwrap();
        assert!(stats.search_range < 3.0);
        assert!(stats.search_range > 2.5);
        assert_eq!(stats.linked, 3);
        assert_eq!(stats.started, 0);

        let tracks = linker.finish();
        assert_eq!(tracks.len(), 3);
        assert!(tracks.iter().all(|t| t.len() == 2));
        assert_eq!(tracks[0].last().x(), 20.0);
        assert_eq!(tracks[1].last().x(), 301.0);
        assert_eq!(tracks[2].last().x(), 305.0);
    }

    #[test]
    fn test_adaptive_validation() {
        assert!(AdaptiveSearch::new(1.0, 1.0).validate().is_err());
        assert!(AdaptiveSearch::new(0.9, 0.0).validate().is_err());
        assert!(AdaptiveSearch::default().validate().is_ok());
    }
}
