//! Frame timing for the game loop.
//!
//! The runtime owns one [`FrameClock`] and hands the resulting [`FrameTime`]
//! to `Game::perform_logic` once per frame.

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
