//! Coordinate and color types shared by the video layer and resources.
//!
//! Window space:
//! - physical pixels
//! - origin top-left
//! - +X right, +Y down
//!
//! 3D math (vectors, matrices, quaternions) comes from `glam`.

mod color;
mod rect;

pub use color::Color;
pub use rect::{PixelRect, Rect};
