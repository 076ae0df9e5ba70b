//! Multi-object tracking for normalized 2-D detections.
//!
//! Every frame, [Tracker::update] predicts each track forward, matches the
//! frame's detections against the tracks with an optimal assignment,
//! re-acquires lost tracks along their momentum-extrapolated path, and
//! spawns, confirms, loses or deletes tracks. Ball-like objects are
//! followed with a projectile filter that knows about gravity.

mod arena;
pub mod config;
mod cost_matrix;
pub mod error;
pub mod hungarian;
pub mod kalman;
pub mod linalg;
pub mod object;
pub mod projectile;
mod recovery;
pub mod track;
pub mod tracker;

pub use tracker::*;
