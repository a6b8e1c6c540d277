//! Ethotrack - Trajectory cleaning and behavior-bout detection for pose-tracking output
//!
//! Ethotrack turns per-frame keypoint coordinates with detection confidence
//! into behavior events through a deterministic pipeline: confidence and
//! geometry filtering → interpolation → smoothing → event detection or frame
//! classification → bout merging → per-event metrics.
//!
//! ## Domains
//!
//! - **Catch**: reach-and-grab detection on one body part, with kinematics per grab
//! - **Label domains** (social, cpp, grooming, swimming, three_chamber): per-frame
//!   labels merged into bouts
//! - **Scratch**: per-minute scratch counts from paw displacement

pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod filters;
pub mod grab;
pub mod merger;
pub mod metrics;
pub mod pipeline;
pub mod scratch;
pub mod smoothing;
pub mod table;
pub mod types;

pub use config::{AnalysisConfig, BehaviorDomain};
pub use error::AnalysisError;
pub use pipeline::{
    analyze_catch, analyze_labels, analyze_scratch, AnalysisOutput, AnalysisReport, BatchOutcome,
    BehaviorAnalyzer,
};

// Table I/O exports
pub use table::{read_keypoint_csv, read_keypoint_table};

/// Engine version embedded in every report
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
