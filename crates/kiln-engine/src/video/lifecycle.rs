use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::event::{Event, Handler, HandlerId};

use super::backend::RenderBackend;

/// Lifecycle channel fired around a device reset.
pub type DeviceEvent = Event<dyn RenderBackend>;

/// Owner of GPU resources that must survive a device reset.
///
/// `on_device_lost` runs while the old device is still open: release every
/// handle created on it. `on_device_restored` runs once the new device is
/// open: recreate them from the retained descriptors.
///
/// An observer is only restored after it was told about the loss, so one
/// registered while a rebuild is pending first hears of the next loss.
pub trait DeviceObserver {
    fn on_device_lost(&mut self, backend: &mut dyn RenderBackend);

    fn on_device_restored(&mut self, backend: &mut dyn RenderBackend);
}

/// Registration of one observer on both lifecycle channels.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ObserverId {
    lost: HandlerId,
    restored: HandlerId,
}

enum Target<O> {
    Lent(Weak<RefCell<O>>),
    Owned(Rc<RefCell<O>>),
}

impl<O> Target<O> {
    fn get(&self) -> Option<Rc<RefCell<O>>> {
        match self {
            Target::Lent(weak) => weak.upgrade(),
            Target::Owned(rc) => Some(Rc::clone(rc)),
        }
    }
}

#[derive(Copy, Clone)]
enum Phase {
    Lost,
    Restored,
}

struct Forward<O> {
    target: Target<O>,
    phase: Phase,
    /// Shared by both phases of one registration; set once the observer has
    /// released its resources.
    released: Rc<Cell<bool>>,
}

impl<O: DeviceObserver> Handler<dyn RenderBackend> for Forward<O> {
    fn call(&mut self, backend: &mut (dyn RenderBackend + 'static)) {
        let Some(observer) = self.target.get() else {
            return;
        };
        let Ok(mut observer) = observer.try_borrow_mut() else {
            log::warn!("device observer busy during lifecycle event; skipped");
            return;
        };
        match self.phase {
            Phase::Lost => {
                observer.on_device_lost(backend);
                self.released.set(true);
            }
            Phase::Restored if self.released.replace(false) => observer.on_device_restored(backend),
            Phase::Restored => log::debug!("device observer registered after the loss; restore skipped"),
        }
    }
}

fn register<O: DeviceObserver + 'static>(
    pre_uninit: &DeviceEvent,
    post_reinit: &DeviceEvent,
    target: impl Fn() -> Target<O>,
) -> ObserverId {
    let released = Rc::new(Cell::new(false));
    ObserverId {
        lost: pre_uninit.give(Forward {
            target: target(),
            phase: Phase::Lost,
            released: Rc::clone(&released),
        }),
        restored: post_reinit.give(Forward {
            target: target(),
            phase: Phase::Restored,
            released,
        }),
    }
}

/// Registers an observer the caller keeps alive. Once the caller drops it
/// the registration does nothing.
pub(crate) fn lend<O: DeviceObserver + 'static>(
    pre_uninit: &DeviceEvent,
    post_reinit: &DeviceEvent,
    observer: &Rc<RefCell<O>>,
) -> ObserverId {
    let weak = Rc::downgrade(observer);
    register(pre_uninit, post_reinit, || Target::Lent(Weak::clone(&weak)))
}

/// Moves an observer into the channels; it is dropped on removal.
pub(crate) fn give<O: DeviceObserver + 'static>(
    pre_uninit: &DeviceEvent,
    post_reinit: &DeviceEvent,
    observer: O,
) -> ObserverId {
    let shared = Rc::new(RefCell::new(observer));
    register(pre_uninit, post_reinit, || Target::Owned(Rc::clone(&shared)))
}

pub(crate) fn remove(pre_uninit: &DeviceEvent, post_reinit: &DeviceEvent, id: ObserverId) -> bool {
    let lost = pre_uninit.remove(id.lost);
    let restored = post_reinit.remove(id.restored);
    lost || restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::video::gl::GlBackend;

    #[derive(Default)]
    struct Counter {
        lost: u32,
        restored: u32,
    }

    impl DeviceObserver for Counter {
        fn on_device_lost(&mut self, _: &mut dyn RenderBackend) {
            self.lost += 1;
        }

        fn on_device_restored(&mut self, _: &mut dyn RenderBackend) {
            self.restored += 1;
        }
    }

    fn channels() -> (DeviceEvent, DeviceEvent, GlBackend) {
        (Event::new(), Event::new(), GlBackend::new(Box::new(HeadlessDevice::new())))
    }

    #[test]
    fn lent_observer_sees_both_phases() {
        let (pre, post, mut backend) = channels();
        let counter = Rc::new(RefCell::new(Counter::default()));
        lend(&pre, &post, &counter);

        pre.fire(&mut backend);
        post.fire(&mut backend);
        assert_eq!((counter.borrow().lost, counter.borrow().restored), (1, 1));
    }

    #[test]
    fn dropped_lent_observer_is_ignored() {
        let (pre, post, mut backend) = channels();
        let counter = Rc::new(RefCell::new(Counter::default()));
        lend(&pre, &post, &counter);
        drop(counter);
        pre.fire(&mut backend);
        post.fire(&mut backend);
    }

    #[test]
    fn removed_observer_is_not_called() {
        let (pre, post, mut backend) = channels();
        let counter = Rc::new(RefCell::new(Counter::default()));
        let id = lend(&pre, &post, &counter);
        assert!(remove(&pre, &post, id));
        assert!(!remove(&pre, &post, id));

        pre.fire(&mut backend);
        assert_eq!(counter.borrow().lost, 0);
    }

    #[test]
    fn given_observer_is_dropped_on_removal() {
        struct Flag(Rc<RefCell<bool>>);
        impl DeviceObserver for Flag {
            fn on_device_lost(&mut self, _: &mut dyn RenderBackend) {}
            fn on_device_restored(&mut self, _: &mut dyn RenderBackend) {}
        }
        impl Drop for Flag {
            fn drop(&mut self) {
                *self.0.borrow_mut() = true;
            }
        }

        let (pre, post, _) = channels();
        let dropped = Rc::new(RefCell::new(false));
        let id = give(&pre, &post, Flag(Rc::clone(&dropped)));
        assert!(!*dropped.borrow());
        remove(&pre, &post, id);
        assert!(*dropped.borrow());
    }

    #[test]
    fn busy_observer_is_skipped() {
        let (pre, post, mut backend) = channels();
        let counter = Rc::new(RefCell::new(Counter::default()));
        lend(&pre, &post, &counter);
        pre.fire(&mut backend);
        post.fire(&mut backend);
        assert_eq!(counter.borrow().restored, 1);

        {
            let _held = counter.borrow_mut();
            pre.fire(&mut backend);
        }
        post.fire(&mut backend);
        assert_eq!((counter.borrow().lost, counter.borrow().restored), (1, 1));
    }

    #[test]
    fn restore_without_a_prior_loss_is_skipped() {
        let (pre, post, mut backend) = channels();
        let counter = Rc::new(RefCell::new(Counter::default()));
        lend(&pre, &post, &counter);

        post.fire(&mut backend);
        assert_eq!((counter.borrow().lost, counter.borrow().restored), (0, 0));

        pre.fire(&mut backend);
        post.fire(&mut backend);
        post.fire(&mut backend);
        assert_eq!((counter.borrow().lost, counter.borrow().restored), (1, 1));
    }
}
