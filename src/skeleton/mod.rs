pub mod bridge;
pub mod convention;
pub mod keypoints;
pub mod pairs;

pub use bridge::{
    coco_to_h36m16, coco_to_h36m_2d, coco_to_h36m_observed, h36m17_to_mvor, mpii_to_h36m16,
    mpii_to_h36m_2d, Source,
};
pub use convention::{Convention, H36mJoint};
pub use keypoints::{remove_joint, Frame, Keypoints2D, Keypoints3D};
pub use pairs::{drawing_pairs, h36m17_to_drawing_pairs, DrawingPairs};
