use std::cell::RefCell;

use super::Handle;

thread_local! {
    static CURRENT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Run `f` with `handle` installed as the thread's current runtime context.
///
/// Worker threads enter once for their whole lifetime; `block_on` enters for
/// the duration of one call so timers work on caller threads too.
pub(crate) fn enter<R>(handle: Handle, f: impl FnOnce() -> R) -> R {
    struct Reset(Option<Handle>);

    impl Drop for Reset {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT.with(|cell| *cell.borrow_mut() = previous);
        }
    }

    let previous = CURRENT.with(|cell| cell.borrow_mut().replace(handle));
    let _reset = Reset(previous);
    f()
}

pub(crate) fn with_current<R>(f: impl FnOnce(&Handle) -> R) -> R {
    CURRENT.with(|cell| {
        let borrowed = cell.borrow();
        let handle = borrowed
            .as_ref()
            .expect("not inside a runtime context; use a worker task or Runtime::block_on");
        f(handle)
    })
}
