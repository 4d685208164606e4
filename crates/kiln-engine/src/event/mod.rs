//! Publish/subscribe channels.
//!
//! The video layer owns two of these (`pre_uninit`, `post_reinit`) and fires
//! them around a device reset; any GPU-resource owner can subscribe.

mod bus;

pub use bus::{Event, Handler, HandlerId};
