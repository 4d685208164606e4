//! Perspective camera with tunnel vision.
//!
//! World convention: forward +X, left +Y, up +Z.

mod perspective;

pub use perspective::{Camera, DepthRange, MIN_TUNNEL_VISION};
