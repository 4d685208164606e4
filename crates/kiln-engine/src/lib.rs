//! Kiln engine crate.
//!
//! A game framework over two render backend variants (OpenGL and Direct3D 9
//! conventions) sharing one device layer, with named resource databases
//! whose GPU resources survive device loss.

pub mod camera;
pub mod coords;
pub mod core;
pub mod database;
pub mod device;
pub mod event;
pub mod logging;
pub mod registry;
pub mod resources;
pub mod time;
pub mod video;
pub mod window;
