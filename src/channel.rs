//! Bounded FIFO hand-off channels with backpressure and close semantics.
//!
//! A [`BoundedChannel`] is the crate's one shared mutable structure: a FIFO
//! queue guarded by a single mutex per channel instance. Senders block
//! cooperatively when the channel is at capacity (backpressure); receivers
//! block until a value arrives or the channel is closed and drained.
//! Multiple receivers compete for values; each value is delivered to
//! exactly one of them.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use slab::Slab;

use crate::error::{Error, Result};

/// How many values a channel buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// No buffer: a send completes only once a receiver is ready to take
    /// the value directly.
    Rendezvous,
    /// Buffer up to this many values; further sends wait.
    Bounded(usize),
    /// Never apply backpressure.
    Unbounded,
}

struct Inner<T> {
    queue: VecDeque<T>,
    capacity: Capacity,
    closed: bool,
    send_waiters: Slab<Waker>,
    recv_waiters: Slab<Waker>,
}

impl<T> Inner<T> {
    fn has_send_capacity(&self) -> bool {
        match self.capacity {
            Capacity::Unbounded => true,
            Capacity::Bounded(bound) => self.queue.len() < bound,
            // Every parked receiver can absorb exactly one queued value.
            Capacity::Rendezvous => self.recv_waiters.len() > self.queue.len(),
        }
    }

    fn wake_one_sender(&mut self) {
        if let Some(key) = self.send_waiters.iter().next().map(|(key, _)| key) {
            self.send_waiters.remove(key).wake();
        }
    }

    fn wake_one_receiver(&mut self) {
        if let Some(key) = self.recv_waiters.iter().next().map(|(key, _)| key) {
            self.recv_waiters.remove(key).wake();
        }
    }
}

/// A FIFO hand-off queue shared between concurrent senders and receivers.
///
/// Handles are cheap clones of one shared channel. Values are received in
/// the order their sends completed; within a single sender that is exactly
/// send order. Once [`close`][BoundedChannel::close]d, sends fail with
/// [`Error::ChannelClosed`] while receives first drain anything still
/// buffered.
///
/// # Example
///
/// ```rust
/// use futures_lite::future::block_on;
/// use task_pipeline::{BoundedChannel, Error};
///
/// let ch = BoundedChannel::bounded(4);
/// block_on(async {
///     ch.send(1).await.unwrap();
///     ch.send(2).await.unwrap();
///     ch.close();
///     assert_eq!(ch.recv().await, Ok(1));
///     assert_eq!(ch.recv().await, Ok(2));
///     assert_eq!(ch.recv().await, Err(Error::ChannelClosed));
/// });
/// ```
pub struct BoundedChannel<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("BoundedChannel")
            .field("capacity", &inner.capacity)
            .field("buffered", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> BoundedChannel<T> {
    /// Create a channel with the given capacity.
    pub fn with_capacity(capacity: Capacity) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                capacity,
                closed: false,
                send_waiters: Slab::new(),
                recv_waiters: Slab::new(),
            })),
        }
    }

    /// A buffered channel. A bound of `0` is a [rendezvous][Capacity::Rendezvous]
    /// channel.
    pub fn bounded(bound: usize) -> Self {
        match bound {
            0 => Self::with_capacity(Capacity::Rendezvous),
            n => Self::with_capacity(Capacity::Bounded(n)),
        }
    }

    /// A channel that never applies backpressure.
    pub fn unbounded() -> Self {
        Self::with_capacity(Capacity::Unbounded)
    }

    /// Send `value`, waiting cooperatively while the channel is at capacity.
    ///
    /// Fails with [`Error::ChannelClosed`] if the channel closes before the
    /// value is handed off.
    pub fn send(&self, value: T) -> SendFuture<'_, T> {
        SendFuture {
            channel: self,
            value: Some(value),
            key: None,
        }
    }

    /// Receive the next value, waiting cooperatively while the channel is
    /// empty and open.
    ///
    /// Yields [`Error::ChannelClosed`] only once the channel is closed *and*
    /// every buffered value has been delivered.
    pub fn recv(&self) -> RecvFuture<'_, T> {
        RecvFuture {
            channel: self,
            key: None,
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T> {
        let mut inner = self.inner.lock().unwrap();
        match inner.queue.pop_front() {
            Some(value) => {
                inner.wake_one_sender();
                Ok(value)
            }
            None if inner.closed => Err(Error::ChannelClosed),
            None => Err(Error::ChannelEmpty),
        }
    }

    /// Close the channel. Idempotent.
    ///
    /// Blocked senders fail with [`Error::ChannelClosed`]; blocked receivers
    /// drain whatever is still buffered first.
    pub fn close(&self) {
        let wakers: Vec<Waker> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            tracing::debug!(buffered = inner.queue.len(), "channel closed");
            let mut wakers: Vec<Waker> = inner.send_waiters.drain().collect();
            wakers.extend(inner.recv_waiters.drain());
            wakers
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Whether [`close`][BoundedChannel::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Whether no values are currently buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The channel's configured capacity.
    pub fn capacity(&self) -> Capacity {
        self.inner.lock().unwrap().capacity
    }
}

/// Future returned by [`BoundedChannel::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a, T> {
    channel: &'a BoundedChannel<T>,
    value: Option<T>,
    key: Option<usize>,
}

impl<T> fmt::Debug for SendFuture<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFuture").finish_non_exhaustive()
    }
}

impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The value is moved out on completion; nothing here is pinned.
        let this = self.get_mut();
        let mut inner = this.channel.inner.lock().unwrap();

        if inner.closed {
            if let Some(key) = this.key.take() {
                if inner.send_waiters.contains(key) {
                    inner.send_waiters.remove(key);
                }
            }
            return Poll::Ready(Err(Error::ChannelClosed));
        }

        if inner.has_send_capacity() {
            let Some(value) = this.value.take() else {
                return Poll::Ready(Ok(()));
            };
            inner.queue.push_back(value);
            if let Some(key) = this.key.take() {
                if inner.send_waiters.contains(key) {
                    inner.send_waiters.remove(key);
                }
            }
            inner.wake_one_receiver();
            return Poll::Ready(Ok(()));
        }

        match this.key {
            // A wake removes the slab entry, so a woken sender that lost the
            // freed slot to a rival must park itself anew.
            Some(key) => match inner.send_waiters.get_mut(key) {
                Some(slot) => slot.clone_from(cx.waker()),
                None => this.key = Some(inner.send_waiters.insert(cx.waker().clone())),
            },
            None => this.key = Some(inner.send_waiters.insert(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut inner = self.channel.inner.lock().unwrap();
            if inner.send_waiters.contains(key) {
                inner.send_waiters.remove(key);
            }
        }
    }
}

/// Future returned by [`BoundedChannel::recv`].
#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<'a, T> {
    channel: &'a BoundedChannel<T>,
    key: Option<usize>,
}

impl<T> fmt::Debug for RecvFuture<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvFuture").finish_non_exhaustive()
    }
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.channel.inner.lock().unwrap();

        if let Some(value) = inner.queue.pop_front() {
            if let Some(key) = this.key.take() {
                if inner.recv_waiters.contains(key) {
                    inner.recv_waiters.remove(key);
                }
            }
            // A slot opened up (or, for rendezvous, another hand-off can
            // be paired).
            inner.wake_one_sender();
            return Poll::Ready(Ok(value));
        }

        if inner.closed {
            if let Some(key) = this.key.take() {
                if inner.recv_waiters.contains(key) {
                    inner.recv_waiters.remove(key);
                }
            }
            return Poll::Ready(Err(Error::ChannelClosed));
        }

        let newly_parked = match this.key {
            // Same as the send side: a wake consumed the slab entry, so a
            // receiver that was beaten to the value must park itself anew.
            Some(key) => match inner.recv_waiters.get_mut(key) {
                Some(slot) => {
                    slot.clone_from(cx.waker());
                    false
                }
                None => {
                    this.key = Some(inner.recv_waiters.insert(cx.waker().clone()));
                    true
                }
            },
            None => {
                this.key = Some(inner.recv_waiters.insert(cx.waker().clone()));
                true
            }
        };
        // A newly parked receiver is what a rendezvous sender is waiting for.
        if newly_parked && inner.capacity == Capacity::Rendezvous {
            inner.wake_one_sender();
        }
        Poll::Pending
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut inner = self.channel.inner.lock().unwrap();
            if inner.recv_waiters.contains(key) {
                inner.recv_waiters.remove(key);
            }
            // This receiver may have been woken for a value it will never
            // take; pass the wake-up on.
            if !inner.queue.is_empty() {
                inner.wake_one_receiver();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::{block_on, zip};

    #[test]
    fn rendezvous_preserves_send_order() {
        let ch = BoundedChannel::bounded(0);
        assert_eq!(ch.capacity(), Capacity::Rendezvous);

        let send_side = async {
            for n in [1, 2, 3] {
                ch.send(n).await.unwrap();
            }
            ch.close();
        };
        let recv_side = async {
            let mut seen = Vec::new();
            while let Ok(value) = ch.recv().await {
                seen.push(value);
            }
            seen
        };

        let ((), seen) = block_on(zip(send_side, recv_side));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn close_drains_buffered_values_first() {
        let ch = BoundedChannel::bounded(4);
        block_on(async {
            ch.send("a").await.unwrap();
            ch.send("b").await.unwrap();
            ch.close();
            ch.close(); // idempotent

            assert_eq!(ch.recv().await, Ok("a"));
            assert_eq!(ch.recv().await, Ok("b"));
            assert_eq!(ch.recv().await, Err(Error::ChannelClosed));
        });
    }

    #[test]
    fn send_after_close_fails() {
        let ch = BoundedChannel::unbounded();
        ch.close();
        assert_eq!(block_on(ch.send(1)), Err(Error::ChannelClosed));
    }

    #[test]
    fn backpressure_blocks_until_a_receive() {
        let ch = BoundedChannel::bounded(1);
        let send_side = async {
            ch.send(1).await.unwrap();
            // This send must wait for the first value to be taken.
            ch.send(2).await.unwrap();
            ch.close();
        };
        let recv_side = async {
            let mut seen = Vec::new();
            while let Ok(value) = ch.recv().await {
                seen.push(value);
            }
            seen
        };
        let ((), seen) = block_on(zip(send_side, recv_side));
        assert_eq!(seen, vec![1, 2]);
    }

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn a_woken_sender_that_loses_the_slot_parks_again() {
        let ch = BoundedChannel::bounded(1);
        block_on(ch.send(1)).unwrap();

        let wakes = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = std::task::Waker::from(Arc::clone(&wakes));
        let mut cx = std::task::Context::from_waker(&waker);

        let mut blocked = ch.send(2);
        assert!(Pin::new(&mut blocked).poll(&mut cx).is_pending());

        // The receive wakes the parked sender and removes its registration.
        assert_eq!(ch.try_recv(), Ok(1));
        assert_eq!(wakes.0.load(Ordering::SeqCst), 1);

        // A rival sender grabs the freed slot before the woken one re-polls.
        block_on(ch.send(3)).unwrap();

        // The loser must end up back in the waiter set, not in limbo.
        assert!(Pin::new(&mut blocked).poll(&mut cx).is_pending());
        assert_eq!(ch.try_recv(), Ok(3));
        assert_eq!(wakes.0.load(Ordering::SeqCst), 2);

        assert!(Pin::new(&mut blocked).poll(&mut cx).is_ready());
        assert_eq!(ch.try_recv(), Ok(2));
    }

    #[test]
    fn a_woken_receiver_that_loses_the_value_parks_again() {
        let ch = BoundedChannel::bounded(1);

        let wakes = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = std::task::Waker::from(Arc::clone(&wakes));
        let mut cx = std::task::Context::from_waker(&waker);

        let mut blocked = ch.recv();
        assert!(Pin::new(&mut blocked).poll(&mut cx).is_pending());

        // The send wakes the parked receiver and removes its registration.
        block_on(ch.send(7)).unwrap();
        assert_eq!(wakes.0.load(Ordering::SeqCst), 1);

        // A rival receiver steals the value before the woken one re-polls.
        assert_eq!(ch.try_recv(), Ok(7));

        assert!(Pin::new(&mut blocked).poll(&mut cx).is_pending());
        block_on(ch.send(8)).unwrap();
        assert_eq!(wakes.0.load(Ordering::SeqCst), 2);
        assert_eq!(Pin::new(&mut blocked).poll(&mut cx), Poll::Ready(Ok(8)));
    }

    #[test]
    fn try_recv_reports_empty_and_closed() {
        let ch = BoundedChannel::<u8>::bounded(2);
        assert_eq!(ch.try_recv(), Err(Error::ChannelEmpty));
        block_on(ch.send(9)).unwrap();
        assert_eq!(ch.try_recv(), Ok(9));
        ch.close();
        assert_eq!(ch.try_recv(), Err(Error::ChannelClosed));
    }
}
