//! Window + runtime loop.
//!
//! Owns the `winit` event loop and window, opens the video device on the
//! window surface and drives a [`Game`](crate::core::Game).

mod runtime;

pub use runtime::{device_config, Runtime, RuntimeConfig};
pub use winit::keyboard::KeyCode;
