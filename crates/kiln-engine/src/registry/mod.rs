//! Process-wide instances keyed by type.
//!
//! Engine-wide managers (`Colors`, `Textures`, ...) live here instead of in
//! hidden statics. Every instance is created either explicitly through
//! [`init`] or lazily through [`get`] for types implementing [`Singleton`],
//! and torn down through [`shutdown`] / [`shutdown_all`].
//!
//! The registry is per thread: the engine is driven from the main thread and
//! every entry is an `Rc<RefCell<T>>`.

mod store;

pub use store::{
    get, init, is_initialized, shutdown, shutdown_all, try_get, Registry, RegistryError,
    Singleton,
};
