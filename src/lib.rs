pub mod camera;
pub mod config;
pub mod deproject;
pub mod error;
pub mod geometry;
pub mod lifter;
pub mod pipeline;
pub mod pnp;
pub mod pose;
pub mod skeleton;

pub use error::{PoseError, Result};
