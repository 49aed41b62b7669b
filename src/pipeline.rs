//! End-to-end analysis: detection, linking, filtering and kinematics.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::kinematics::dense_ids;
use crate::{
    Detector, Error, FilterReport, KinematicsEngine, Linker, Observation, Result,
    SummaryStatistics, Track, TrackMetrics,
};

/// Everything one run produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Number of frames consumed.
    pub frames: usize,
    /// Tracks that passed the trajectory filter, ordered by id.
    pub tracks: Vec<Track>,
    /// Metrics of every non-degenerate surviving track.
    pub metrics: Vec<TrackMetrics>,
    /// Ids of surviving tracks with zero duration.
    pub degenerate_tracks: Vec<u64>,
    pub filter_report: FilterReport,
    pub summary: SummaryStatistics,
}

impl PipelineOutput {
    /// Dense `0..N-1` presentation index for each reported track id.
    pub fn renumbered(&self) -> HashMap<u64, usize> {
        dense_ids(&self.metrics)
    }
}

/// A configured, validated analysis pipeline.
///
/// The pipeline holds no per-run state: every call to `run` links with a
/// fresh `Linker`, so track ids restart at 0 for each video.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    detector: Detector,
    engine: KinematicsEngine,
}

impl Pipeline {
    /// Validate the configuration and build every stage.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let detector = Detector::new(config.detector.clone())?;
        let engine = KinematicsEngine::new(config.kinematics.clone())?;
        Ok(Self {
            config,
            detector,
            engine,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Analyse a video given as equally shaped grayscale frames.
    ///
    /// Zero frames yield an empty output.
    pub fn run(&self, frames: &[Array2<f64>]) -> Result<PipelineOutput> {
        if let Some(first) = frames.first() {
            let shape = first.dim();
            if let Some((index, frame)) = frames.iter().enumerate().find(|(_, f)| f.dim() != shape) {
                return Err(Error::FrameShape(format!(
                    "frame {} is {:?}, expected {:?}",
                    index,
                    frame.dim(),
                    shape
                )));
            }
        }

        let observations = self
            .detector
            .batch(frames, self.config.parallel_detection);
        self.run_observations(observations)
    }

    /// Analyse pre-extracted observations; position `i` holds frame `i`.
    pub fn run_observations(&self, frames: Vec<Vec<Observation>>) -> Result<PipelineOutput> {
        let n_frames = frames.len();
        let n_observations: usize = frames.iter().map(Vec::len).sum();

        let mut linker = Linker::new(self.config.linker.clone())?;
        linker.link_frames(frames)?;
        let tracks = linker.finish();

        let (tracks, filter_report) = self.config.filter.apply_with_report(tracks);
        let kinematics = self.engine.compute_all(&tracks);
        let summary = SummaryStatistics::from_metrics(&kinematics.metrics);

        info!(
            frames = n_frames,
            observations = n_observations,
            tracks_linked = filter_report.input,
            stubs_removed = filter_report.stubs_removed,
            gate_removed = filter_report.gate_removed,
            tracks_kept = filter_report.kept(),
            degenerate = kinematics.degenerate.len(),
            "pipeline run complete"
        );

        Ok(PipelineOutput {
            frames: n_frames,
            tracks,
            metrics: kinematics.metrics,
            degenerate_tracks: kinematics.degenerate,
            filter_report,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, KinematicsConfig, LinkerConfig};
    use crate::TrajectoryFilter;
    use approx::assert_abs_diff_eq;

    fn config(min_length: usize) -> PipelineConfig {
        PipelineConfig {
            detector: DetectorConfig::new(11, 100.0),
            linker: LinkerConfig::new(6.0, 1),
            filter: TrajectoryFilter::new(min_length),
            kinematics: KinematicsConfig::new(10.0, 1.0),
            parallel_detection: false,
        }
    }

    fn spot_frame(x: f64, y: f64) -> Array2<f64> {
        Array2::from_shape_fn((41, 61), |(row, col)| {
            let r2 = (col as f64 - x).powi(2) + (row as f64 - y).powi(2);
            10.0 + 200.0 * (-r2 / 8.0).exp()
        })
    }

    #[test]
    fn test_zero_frames() {
        let pipeline = Pipeline::new(config(1)).unwrap();
        let output = pipeline.run(&[]).unwrap();
        assert_eq!(output.frames, 0);
        assert!(output.tracks.is_empty());
        assert!(output.metrics.is_empty());
        assert_eq!(output.summary.n_tracks, 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = config(1);
        bad.kinematics.fps = -1.0;
        assert!(Pipeline::new(bad).is_err());
    }

    #[test]
    fn test_rejects_mismatched_frames() {
        let pipeline = Pipeline::new(config(1)).unwrap();
        let frames: Vec<Array2<f64>> = vec![Array2::zeros((20, 20)), Array2::zeros((20, 21))];
        assert!(matches!(pipeline.run(&frames), Err(Error::FrameShape(_))));
    }

    #[test]
    fn test_run_observations_three_frames() {
        let pipeline = Pipeline::new(config(3)).unwrap();
        let frames = vec![
            vec![Observation::at(0, 10.0, 10.0, 500.0).unwrap()],
            vec![Observation::at(1, 12.0, 10.0, 500.0).unwrap()],
            vec![Observation::at(2, 14.0, 10.0, 500.0).unwrap()],
        ];
        let output = pipeline.run_observations(frames).unwrap();

        assert_eq!(output.tracks.len(), 1);
        assert_eq!(output.metrics.len(), 1);
        assert_abs_diff_eq!(output.metrics[0].velocity, 4.0 / 0.2, epsilon = 1e-9);
        assert_eq!(output.renumbered()[&output.metrics[0].track_id], 0);
    }

    #[test]
    fn test_degenerate_tracks_reported() {
        let pipeline = Pipeline::new(config(1)).unwrap();
        let frames = vec![
            vec![Observation::at(0, 10.0, 10.0, 500.0).unwrap()],
            vec![],
            vec![],
        ];
        let output = pipeline.run_observations(frames).unwrap();
        assert_eq!(output.tracks.len(), 1);
        assert!(output.metrics.is_empty());
        assert_eq!(output.degenerate_tracks, vec![0]);
    }

    #[test]
    fn test_synthetic_video() {
        let frames: Vec<Array2<f64>> = (0..10).map(|i| spot_frame(10.0 + 3.0 * i as f64, 20.0)).collect();
        let pipeline = Pipeline::new(config(5)).unwrap();
        let output = pipeline.run(&frames).unwrap();

        assert_eq!(output.frames, 10);
        assert_eq!(output.tracks.len(), 1);
        assert_eq!(output.tracks[0].len(), 10);
        let m = &output.metrics[0];
        assert_abs_diff_eq!(m.distance, 27.0, epsilon = 1.0);
        assert_abs_diff_eq!(m.transit_time, 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(m.velocity, 30.0, epsilon = 1.5);
    }
}
