use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

use crossbeam_channel::Sender;

use super::Message;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const IDLE: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

/// A schedulable unit: a boxed future plus the state machine that keeps it
/// on exactly one worker at a time.
///
/// A wake-up that arrives while the future is being polled parks the task in
/// `NOTIFIED`; the polling worker re-queues it before moving on, so no
/// wake-up is ever lost.
pub(crate) struct Runnable {
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
    state: AtomicU8,
    injector: Sender<Message>,
}

impl Runnable {
    pub(crate) fn new<F>(future: F, injector: Sender<Message>) -> Arc<Self>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            future: Mutex::new(Some(Box::pin(future))),
            state: AtomicU8::new(QUEUED),
            injector,
        })
    }

    /// Put a freshly created task on the run queue.
    pub(crate) fn enqueue(self: &Arc<Self>) {
        let _ = self.injector.send(Message::Run(Arc::clone(self)));
    }

    /// Poll the future once. Called by a worker that dequeued this task.
    pub(crate) fn run(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock().unwrap();
        let Some(future) = slot.as_mut() else {
            self.state.store(COMPLETE, Ordering::Release);
            return;
        };

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                self.state.store(COMPLETE, Ordering::Release);
            }
            Poll::Pending => {
                drop(slot);
                if self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken mid-poll: go straight back on the queue.
                    self.state.store(QUEUED, Ordering::Release);
                    let injector = self.injector.clone();
                    let _ = injector.send(Message::Run(self));
                }
            }
        }
    }

    fn schedule(self: Arc<Self>) {
        loop {
            let state = self.state.load(Ordering::Acquire);
            match state {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let injector = self.injector.clone();
                        let _ = injector.send(Message::Run(self));
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already queued, already notified, or done for good.
                _ => return,
            }
        }
    }
}

impl Wake for Runnable {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Arc::clone(self).schedule();
    }
}
