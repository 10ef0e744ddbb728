pub mod detector;
pub mod keypoint;
#[cfg(feature = "desktop")]
pub mod preprocess;

pub use detector::{KeypointDetector, OnnxKeypointDetector};
pub use keypoint::{Detections, KeypointIndex};
#[cfg(feature = "desktop")]
pub use preprocess::preprocess_for_detector;
