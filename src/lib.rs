pub mod classifier;
pub mod cli;
pub mod config;
pub mod draw;
pub mod error;
pub mod features;
pub mod ffi;
pub mod flann;
pub mod handle;
pub mod homography;
pub mod image;
pub mod keypoint;
pub mod matcher;
pub mod matrix;
pub mod registry;
pub mod tracker;

pub use config::Opts;
pub use error::{Error, Result};
pub use features::{Describe, Detect, Feature, FeatureConfig};
pub use flann::{FlannIndex, IndexParams, IndexSearch};
pub use handle::Handle;
pub use homography::Homography;
pub use matcher::{BruteForceMatcher, KnnMatches, Match, Norm};
pub use matrix::{DescriptorKind, Descriptors, Matrix};
pub use registry::Registry;
pub use tracker::PlanarTracker;
