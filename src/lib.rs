//! # celltrack-rs - Particle tracking for microfluidic cell videos
//!
//! Detects blob-like cells in grayscale frames, links them into trajectories
//! across frames, filters out spurious tracks, and reduces each surviving
//! track to physical metrics (distance, transit time, velocity, size).
//!
//! ## Features
//!
//! - Band-pass + local-maximum feature detection with sub-pixel refinement
//! - Greedy nearest-neighbour linking with bounded search range and memory
//! - Optional adaptive search-range shrinking for dense frames
//! - Stub filtering and geometric (displacement) gating
//! - Per-track kinematics and population summary statistics
//! - Application presets (transient adhesion, deformability, fluorescence)
//!
//! ## Example
//!
//! ```rust,ignore
//! use celltrack_rs::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::deformability(300.0, 24.0, 0.5);
//! let pipeline = Pipeline::new(config)?;
//! let output = pipeline.run(&frames)?;
//! for m in &output.metrics {
//!     println!("{} {:.2} um/s", m.track_id, m.velocity);
//! }
//! ```

// Public modules
pub mod config;
pub mod detector;
pub mod distances;
pub mod kinematics;
pub mod linker;
pub mod matching;
pub mod observation;
pub mod pipeline;
pub mod track;
pub mod trajectory_filter;
pub mod utils;

// Re-exports for convenience
pub use config::{DetectorConfig, KinematicsConfig, LinkerConfig, PipelineConfig};
pub use detector::Detector;
pub use kinematics::{Axis, KinematicsEngine, SizeSource, SummaryStatistics, TrackMetrics};
pub use linker::{AdaptiveSearch, Linker};
pub use observation::Observation;
pub use pipeline::{Pipeline, PipelineOutput};
pub use track::Track;
pub use trajectory_filter::{FilterReport, GeometricGate, TrajectoryFilter};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the celltrack library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid parameter: {0}")]
        InvalidParameter(String),

        #[error("Invalid observation: {0}")]
        InvalidObservation(String),

        #[error("Frames out of order: frame {current} received after frame {previous}")]
        FrameOrder { previous: usize, current: usize },

        #[error("Invalid frame shape: {0}")]
        FrameShape(String),

        #[error("Configuration error: {0}")]
        Config(#[from] serde_json::Error),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Result type for celltrack operations
    pub type Result<T> = std::result::Result<T, Error>;
}
