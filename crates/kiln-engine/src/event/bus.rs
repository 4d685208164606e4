use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// A callback invoked when an [`Event`] fires.
///
/// Closures taking `&mut A` implement this automatically.
pub trait Handler<A: ?Sized> {
    fn call(&mut self, arg: &mut A);
}

impl<A: ?Sized, F> Handler<A> for F
where
    F: FnMut(&mut A),
{
    fn call(&mut self, arg: &mut A) {
        self(arg)
    }
}

/// Identifies one registration on one [`Event`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type SharedHandler<A> = Rc<RefCell<dyn Handler<A>>>;

enum Slot<A: ?Sized> {
    /// Caller keeps the handler alive; the bus only observes it.
    Lent(Weak<RefCell<dyn Handler<A>>>),
    /// The bus owns the handler and drops it on removal.
    Owned(SharedHandler<A>),
}

impl<A: ?Sized> Slot<A> {
    fn upgrade(&self) -> Option<SharedHandler<A>> {
        match self {
            Slot::Lent(weak) => weak.upgrade(),
            Slot::Owned(rc) => Some(Rc::clone(rc)),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Slot::Lent(weak) => weak.strong_count() > 0,
            Slot::Owned(_) => true,
        }
    }
}

struct Registration<A: ?Sized> {
    id: HandlerId,
    slot: Slot<A>,
}

/// Ordered publish/subscribe channel.
///
/// Registration comes in three ownership flavors:
/// - [`lend`](Self::lend): the caller keeps the handler; the bus holds a weak
///   reference and silently drops the registration once the handler is gone.
/// - [`give`](Self::give): ownership moves into the bus.
/// - [`fax`](Self::fax): the bus stores its own clone.
///
/// All methods take `&self` so handlers may register or unregister (including
/// themselves) while the event is firing. Such changes apply to later fires
/// only: [`fire`](Self::fire) iterates a snapshot taken when it starts.
pub struct Event<A: ?Sized> {
    registrations: RefCell<Vec<Registration<A>>>,
    next_id: Cell<u64>,
}

impl<A: ?Sized> Event<A> {
    pub fn new() -> Self {
        Self {
            registrations: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// Registers a handler the caller keeps ownership of.
    pub fn lend<H>(&self, handler: &Rc<RefCell<H>>) -> HandlerId
    where
        H: Handler<A> + 'static,
    {
        let shared: SharedHandler<A> = handler.clone();
        self.push(Slot::Lent(Rc::downgrade(&shared)))
    }

    /// Moves `handler` into the bus.
    pub fn give<H>(&self, handler: H) -> HandlerId
    where
        H: Handler<A> + 'static,
    {
        let shared: SharedHandler<A> = Rc::new(RefCell::new(handler));
        self.push(Slot::Owned(shared))
    }

    /// Registers an owned clone of `handler`.
    pub fn fax<H>(&self, handler: &H) -> HandlerId
    where
        H: Handler<A> + Clone + 'static,
    {
        self.give(handler.clone())
    }

    /// Removes a registration. Returns `false` if `id` is not registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        let removed = {
            let mut regs = self.registrations.borrow_mut();
            let Some(pos) = regs.iter().position(|r| r.id == id) else {
                return false;
            };
            regs.remove(pos)
        };
        // Owned handlers are dropped here, outside the borrow, so their Drop
        // impls may touch this event again.
        drop(removed);
        true
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.registrations
            .borrow()
            .iter()
            .any(|r| r.id == id && r.slot.is_alive())
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations
            .borrow()
            .iter()
            .filter(|r| r.slot.is_alive())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every live handler in registration order.
    pub fn fire(&self, arg: &mut A) {
        let snapshot: Vec<(HandlerId, SharedHandler<A>)> = {
            let mut regs = self.registrations.borrow_mut();
            regs.retain(|r| r.slot.is_alive());
            regs.iter()
                .filter_map(|r| r.slot.upgrade().map(|h| (r.id, h)))
                .collect()
        };

        for (id, handler) in snapshot {
            match handler.try_borrow_mut() {
                Ok(mut h) => h.call(arg),
                Err(_) => log::warn!("event handler {id:?} re-entered while firing; skipped"),
            }
        }
    }

    /// Drops every registration. Owned handlers are destroyed.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.registrations.borrow_mut());
        drop(drained);
    }

    fn push(&self, slot: Slot<A>) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.registrations.borrow_mut().push(Registration { id, slot });
        id
    }
}

impl<A: ?Sized> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> std::fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}
