//! The contract between the runtime and the application.
//!
//! [`Game`] is what an application implements; [`run_frame`] is one
//! iteration of the loop the runtime drives, usable without a window.

mod game;

pub use game::{run_frame, AppControl, Game};
