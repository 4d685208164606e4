use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),
}

/// A type that can construct its own process-wide instance on first use.
pub trait Singleton: Sized + 'static {
    type Error;

    fn create() -> Result<Self, Self::Error>;
}

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    value: Rc<dyn Any>,
}

/// Type-keyed storage, shut down in reverse initialization order.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init<T: 'static>(&mut self, value: T) -> Result<Rc<RefCell<T>>, RegistryError> {
        let type_name = std::any::type_name::<T>();
        if self.position::<T>().is_some() {
            return Err(RegistryError::AlreadyInitialized(type_name));
        }

        let shared = Rc::new(RefCell::new(value));
        self.entries.push(Entry {
            type_id: TypeId::of::<T>(),
            type_name,
            value: shared.clone(),
        });
        log::debug!("registry: initialized {type_name}");
        Ok(shared)
    }

    pub fn get<T: 'static>(&self) -> Option<Rc<RefCell<T>>> {
        let entry = &self.entries[self.position::<T>()?];
        Rc::clone(&entry.value).downcast::<RefCell<T>>().ok()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.position::<T>().is_some()
    }

    /// Removes the registry's reference to `T`.
    ///
    /// The instance is dropped once every outstanding `Rc` handed out by
    /// [`get`](Self::get) is gone.
    pub fn shutdown<T: 'static>(&mut self) -> Option<Rc<dyn Any>> {
        let pos = self.position::<T>()?;
        let entry = self.entries.remove(pos);
        log::debug!("registry: shut down {}", entry.type_name);
        Some(entry.value)
    }

    /// Removes the most recently initialized entry.
    pub fn pop(&mut self) -> Option<Rc<dyn Any>> {
        let entry = self.entries.pop()?;
        log::debug!("registry: shut down {}", entry.type_name);
        Some(entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position<T: 'static>(&self) -> Option<usize> {
        let id = TypeId::of::<T>();
        self.entries.iter().position(|e| e.type_id == id)
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::new());
}

/// Registers `value` as the process-wide `T`.
pub fn init<T: 'static>(value: T) -> Result<Rc<RefCell<T>>, RegistryError> {
    REGISTRY.with_borrow_mut(|r| r.init(value))
}

/// Returns the process-wide `T`, constructing it on first use.
///
/// Construction runs outside the registry borrow, so `T::create` may itself
/// fetch other singletons.
pub fn get<T: Singleton>() -> Result<Rc<RefCell<T>>, T::Error> {
    if let Some(existing) = try_get::<T>() {
        return Ok(existing);
    }

    let value = T::create()?;
    let shared = REGISTRY.with_borrow_mut(|r| match r.get::<T>() {
        // `create` registered an instance itself; keep the first one.
        Some(existing) => existing,
        None => {
            let shared = Rc::new(RefCell::new(value));
            r.entries.push(Entry {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                value: shared.clone(),
            });
            log::debug!("registry: lazily initialized {}", std::any::type_name::<T>());
            shared
        }
    });
    Ok(shared)
}

pub fn try_get<T: 'static>() -> Option<Rc<RefCell<T>>> {
    REGISTRY.with_borrow(|r| r.get::<T>())
}

pub fn is_initialized<T: 'static>() -> bool {
    REGISTRY.with_borrow(|r| r.contains::<T>())
}

/// Shuts down the process-wide `T`. Returns `false` if it was not initialized.
pub fn shutdown<T: 'static>() -> bool {
    let removed = REGISTRY.with_borrow_mut(|r| r.shutdown::<T>());
    // Dropped outside the borrow; destructors may use the registry.
    removed.is_some()
}

/// Shuts down every instance, most recently initialized first.
pub fn shutdown_all() {
    while let Some(value) = REGISTRY.with_borrow_mut(|r| r.pop()) {
        drop(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static DROPS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
        static CREATED: Cell<u32> = const { Cell::new(0) };
    }

    struct First;
    struct Second;

    impl Drop for First {
        fn drop(&mut self) {
            DROPS.with_borrow_mut(|d| d.push("first"));
        }
    }

    impl Drop for Second {
        fn drop(&mut self) {
            DROPS.with_borrow_mut(|d| d.push("second"));
        }
    }

    struct Lazy(u32);

    impl Singleton for Lazy {
        type Error = std::convert::Infallible;

        fn create() -> Result<Self, Self::Error> {
            CREATED.set(CREATED.get() + 1);
            Ok(Lazy(7))
        }
    }

    struct Dependent(u32);

    impl Singleton for Dependent {
        type Error = std::convert::Infallible;

        fn create() -> Result<Self, Self::Error> {
            let lazy = get::<Lazy>()?;
            let value = lazy.borrow().0 * 2;
            Ok(Dependent(value))
        }
    }

    struct Broken;

    impl Singleton for Broken {
        type Error = &'static str;

        fn create() -> Result<Self, Self::Error> {
            Err("no device")
        }
    }

    // ── local registry ────────────────────────────────────────────────────

    #[test]
    fn init_twice_is_rejected() {
        let mut r = Registry::new();
        r.init(1u32).unwrap();
        assert!(matches!(r.init(2u32), Err(RegistryError::AlreadyInitialized(_))));
        assert_eq!(*r.get::<u32>().unwrap().borrow(), 1);
    }

    #[test]
    fn get_returns_shared_instance() {
        let mut r = Registry::new();
        let a = r.init(String::from("video")).unwrap();
        let b = r.get::<String>().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(r.get::<u8>().is_none());
    }

    #[test]
    fn pop_releases_in_reverse_order() {
        DROPS.with_borrow_mut(|d| d.clear());
        let mut r = Registry::new();
        r.init(First).unwrap();
        r.init(Second).unwrap();
        while r.pop().is_some() {}
        DROPS.with_borrow(|d| assert_eq!(*d, ["second", "first"]));
    }

    // ── thread registry ───────────────────────────────────────────────────

    #[test]
    fn lazy_singleton_is_created_once() {
        shutdown_all();
        CREATED.set(0);
        let a = get::<Lazy>().unwrap();
        let b = get::<Lazy>().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(CREATED.get(), 1);
        assert!(shutdown::<Lazy>());
        assert!(!shutdown::<Lazy>());
    }

    #[test]
    fn singleton_may_depend_on_another() {
        shutdown_all();
        let dep = get::<Dependent>().unwrap();
        assert_eq!(dep.borrow().0, 14);
        assert!(is_initialized::<Lazy>());
        shutdown_all();
        assert!(!is_initialized::<Dependent>());
    }

    #[test]
    fn failed_construction_registers_nothing() {
        shutdown_all();
        assert_eq!(get::<Broken>().err(), Some("no device"));
        assert!(!is_initialized::<Broken>());
    }
}
