use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};
use slab::Slab;

use crate::error::{Error, Result};

/// Cooperative cancellation flag shared between a task, its handle, and its
/// owning group.
///
/// Tokens form a tree: setting a token sets all tokens attached below it,
/// which is what makes group cancellation transitive. The flag only ever
/// goes from unset to set.
pub(crate) struct CancelToken {
    flag: AtomicBool,
    inner: Mutex<TokenInner>,
}

struct TokenInner {
    wakers: Slab<Waker>,
    // Weak: a token lives as long as its task or group, not as long as the
    // parent it is attached to.
    children: Vec<Weak<CancelToken>>,
}

impl CancelToken {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            inner: Mutex::new(TokenInner {
                wakers: Slab::new(),
                children: Vec::new(),
            }),
        })
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Set the flag, wake every registered waiter, and cascade to children.
    pub(crate) fn set(&self) {
        if self.flag.swap(true, Ordering::AcqRel) {
            return;
        }
        let (wakers, children) = {
            let mut inner = self.inner.lock().unwrap();
            let wakers: Vec<Waker> = inner.wakers.drain().collect();
            (wakers, std::mem::take(&mut inner.children))
        };
        for waker in wakers {
            waker.wake();
        }
        for child in children {
            if let Some(child) = child.upgrade() {
                child.set();
            }
        }
    }

    /// Attach `child` so it is set together with (or immediately after) this
    /// token.
    pub(crate) fn attach_child(&self, child: Arc<CancelToken>) {
        if self.is_set() {
            child.set();
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        // Checked again under the lock so a concurrent `set` cannot miss us.
        if self.flag.load(Ordering::Acquire) {
            drop(inner);
            child.set();
        } else {
            // Finished subtrees leave dead entries behind; prune as we go so
            // a long-lived token never accumulates them.
            inner.children.retain(|child| child.strong_count() > 0);
            inner.children.push(Arc::downgrade(&child));
        }
    }

    fn register(&self, waker: &Waker) -> usize {
        self.inner.lock().unwrap().wakers.insert(waker.clone())
    }

    fn update(&self, key: usize, waker: &Waker) {
        if let Some(slot) = self.inner.lock().unwrap().wakers.get_mut(key) {
            slot.clone_from(waker);
        }
    }

    fn deregister(&self, key: usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.wakers.contains(key) {
            inner.wakers.remove(key);
        }
    }
}

/// Wraps a task body so cancellation is observed at every suspension point.
///
/// Cancellation is not preemptive: a body that is mid-computation between
/// suspension points finishes its synchronous stretch first; the flag is
/// checked when the task is (re-)polled.
#[pin_project(PinnedDrop)]
pub(crate) struct Cancellable<F> {
    #[pin]
    inner: F,
    token: Arc<CancelToken>,
    key: Option<usize>,
}

impl<F> Cancellable<F> {
    pub(crate) fn new(token: Arc<CancelToken>, inner: F) -> Self {
        Self {
            inner,
            token,
            key: None,
        }
    }
}

impl<T, F> Future for Cancellable<F>
where
    F: Future<Output = Result<T>>,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.token.is_set() {
            if let Some(key) = this.key.take() {
                this.token.deregister(key);
            }
            return Poll::Ready(Err(Error::TaskCancelled));
        }

        match this.key {
            Some(key) => this.token.update(*key, cx.waker()),
            None => *this.key = Some(this.token.register(cx.waker())),
        }

        // A `set` racing the check above may have drained the waker slab
        // before this registration landed; re-reading the flag after
        // registering closes that window.
        if this.token.is_set() {
            if let Some(key) = this.key.take() {
                this.token.deregister(key);
            }
            return Poll::Ready(Err(Error::TaskCancelled));
        }

        match this.inner.poll(cx) {
            Poll::Ready(output) => {
                if let Some(key) = this.key.take() {
                    this.token.deregister(key);
                }
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl<F> PinnedDrop for Cancellable<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(key) = this.key.take() {
            this.token.deregister(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn set_is_idempotent_and_cascades() {
        let parent = CancelToken::new();
        let child = CancelToken::new();
        parent.attach_child(Arc::clone(&child));

        parent.set();
        parent.set();
        assert!(parent.is_set());
        assert!(child.is_set());

        // Attaching to an already-set token sets the new child right away.
        let late = CancelToken::new();
        parent.attach_child(Arc::clone(&late));
        assert!(late.is_set());
    }

    #[test]
    fn dropped_subtrees_are_pruned_on_attach() {
        let parent = CancelToken::new();
        for _ in 0..16 {
            parent.attach_child(CancelToken::new());
        }

        let kept = CancelToken::new();
        parent.attach_child(Arc::clone(&kept));
        assert!(parent.inner.lock().unwrap().children.len() <= 2);

        parent.set();
        assert!(kept.is_set());
    }

    #[test]
    fn cancelled_before_first_poll() {
        let token = CancelToken::new();
        token.set();
        let guarded = Cancellable::new(token, async { Ok(1u8) });
        assert_eq!(block_on(guarded), Err(Error::TaskCancelled));
    }

    #[test]
    fn set_from_another_thread_wakes_a_parked_task() {
        let token = CancelToken::new();
        let setter = {
            let token = Arc::clone(&token);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                token.set();
            })
        };

        // The guarded future itself never completes; only the token can end
        // this, so a lost registration would hang here forever.
        let guarded = Cancellable::new(token, futures_lite::future::pending::<Result<u8>>());
        assert_eq!(block_on(guarded), Err(Error::TaskCancelled));
        setter.join().unwrap();
    }

    #[test]
    fn completes_when_not_cancelled() {
        let token = CancelToken::new();
        let guarded = Cancellable::new(token, async { Ok(7u8) });
        assert_eq!(block_on(guarded), Ok(7));
    }
}
