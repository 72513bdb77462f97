use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{Error, Result};

pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) waker: Waker,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the nearest deadline on top.
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

pub(crate) enum TimerCommand {
    Register(TimerEntry),
    Shutdown,
}

/// Body of the dedicated timer thread: keep a deadline heap, sleep until the
/// nearest deadline or the next command, wake whatever has expired.
pub(crate) fn timer_loop(commands: Receiver<TimerCommand>) {
    let mut heap: BinaryHeap<TimerEntry> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = heap.pop() {
                if !entry.cancelled.load(Ordering::Acquire) {
                    entry.waker.wake();
                }
            }
        }

        let command = match heap.peek() {
            Some(entry) => match commands.recv_timeout(entry.deadline - now) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };

        match command {
            TimerCommand::Register(entry) => heap.push(entry),
            TimerCommand::Shutdown => return,
        }
    }
}

/// Suspend the current task for at least `duration`.
///
/// This is one of the crate's suspension points: cancellation and shutdown
/// are observed here. Must be awaited inside a runtime context (a worker
/// thread or [`Runtime::block_on`][crate::Runtime::block_on]).
pub fn delay(duration: Duration) -> Delay {
    Delay {
        deadline: Instant::now() + duration,
        registered: false,
        cancelled: Arc::new(AtomicBool::new(false)),
    }
}

/// Future returned by [`delay`].
#[derive(Debug)]
pub struct Delay {
    deadline: Instant,
    registered: bool,
    cancelled: Arc<AtomicBool>,
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if Instant::now() >= this.deadline {
            return Poll::Ready(());
        }

        if !this.registered {
            this.registered = true;
            super::context::with_current(|handle| {
                handle.register_timer(TimerEntry {
                    deadline: this.deadline,
                    waker: cx.waker().clone(),
                    cancelled: Arc::clone(&this.cancelled),
                });
            });
        }

        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Runs `inner` against a deadline; expiry surfaces as cancellation.
#[pin_project::pin_project]
pub(crate) struct Timeout<F> {
    #[pin]
    inner: F,
    #[pin]
    delay: Delay,
}

impl<F> Timeout<F> {
    pub(crate) fn new(inner: F, duration: Duration) -> Self {
        Self {
            inner,
            delay: delay(duration),
        }
    }
}

impl<T, F> Future for Timeout<F>
where
    F: Future<Output = Result<T>>,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(output) = this.inner.poll(cx) {
            return Poll::Ready(output);
        }
        match this.delay.poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Error::TaskCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
