//! Cold, pull-driven lazy sequences.
//!
//! A [`LazySequence`] is an inert description of how to produce values:
//! combinators like [`map`][LazySequence::map], [`take`][LazySequence::take],
//! [`combine`][LazySequence::combine], and [`catch`][LazySequence::catch]
//! only build up a chain of inert stages. No work happens until
//! [`collect`][LazySequence::collect] drives the chain. Each consumption
//! starts the chain from the beginning; there is no sharing and no
//! memoization.
//!
//! # Examples
//!
//! **Transform and truncate a sequence**
//!
//! ```rust
//! use futures_lite::future::block_on;
//! use task_pipeline::seq::{from_iter, LazySequence};
//!
//! block_on(async {
//!     let mut out = Vec::new();
//!     from_iter(1..)
//!         .map(|n| n * n)
//!         .take(3)
//!         .collect(|n| out.push(n))
//!         .await
//!         .unwrap();
//!     assert_eq!(out, vec![1, 4, 9]);
//! });
//! ```
//!
//! **Suspending generator**
//!
//! ```rust
//! use futures_lite::future::block_on;
//! use task_pipeline::seq::{generate, LazySequence};
//!
//! block_on(async {
//!     let seq = generate(|emitter| async move {
//!         for n in 0..3 {
//!             emitter.emit(n).await;
//!         }
//!         Ok(())
//!     });
//!     let mut out = Vec::new();
//!     seq.collect(|n| out.push(n)).await.unwrap();
//!     assert_eq!(out, vec![0, 1, 2]);
//! });
//! ```

mod catch;
mod combine;
mod map;
mod sources;
mod take;

pub use catch::Catch;
pub use combine::Combine;
pub use map::Map;
pub use sources::{from_iter, from_stream, generate, Emitter, FromIter, FromStream, Generate};
pub use take::Take;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{Error, Result};

/// A boxed, type-erased lazy sequence, for dynamically assembled chains.
pub type BoxSequence<T> = Pin<Box<dyn LazySequence<Item = T> + Send>>;

/// A cold, pull-driven producer of values.
///
/// Implementors advance exactly one step per [`poll_next`][Self::poll_next]
/// call; after yielding `None` or an error the sequence is finished. All
/// provided combinators are inert until driven by
/// [`collect`][Self::collect], the only executing operation.
pub trait LazySequence {
    /// The values this sequence yields.
    type Item;

    /// Advance the sequence by one step.
    ///
    /// `Some(Ok(item))` yields a value, `Some(Err(_))` reports a failure
    /// (the sequence is finished afterwards), `None` signals completion.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Self::Item>>>;

    /// Lazily apply `f` to each pulled element.
    fn map<U, F>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> U,
    {
        Map::new(self, f)
    }

    /// Yield at most `n` elements, then complete without advancing the
    /// upstream any further.
    ///
    /// Since upstream pulls may have side effects, nothing beyond what is
    /// consumed is ever computed.
    fn take(self, n: usize) -> Take<Self>
    where
        Self: Sized,
    {
        Take::new(self, n)
    }

    /// Pair each emission of either sequence with the most recent value of
    /// the other, once both have emitted at least once.
    fn combine<B, F, V>(self, other: B, f: F) -> Combine<Self, B, F, V>
    where
        Self: Sized,
        Self::Item: Clone,
        B: LazySequence,
        B::Item: Clone,
        F: FnMut(&Self::Item, &B::Item) -> V,
    {
        Combine::new(self, other, f)
    }

    /// Intercept a failure raised upstream: `handler` is invoked once with
    /// the error and the sequence then completes gracefully.
    ///
    /// This is a one-shot absorb, not a retry: the upstream is never
    /// resumed past its failure point. Failures introduced by stages chained
    /// *after* the `catch` are not covered.
    fn catch<H>(self, handler: H) -> Catch<Self, H>
    where
        Self: Sized,
        H: FnOnce(Error),
    {
        Catch::new(self, handler)
    }

    /// Drive the sequence to completion, handing each element to `consumer`.
    ///
    /// This is the only operation that performs actual execution. Returns
    /// the first uncaught upstream failure, if any.
    fn collect<F>(self, consumer: F) -> Collect<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item),
    {
        Collect {
            seq: self,
            consumer,
            done: false,
        }
    }

    /// Erase the concrete type, for dynamically assembled stage chains.
    fn boxed(self) -> BoxSequence<Self::Item>
    where
        Self: Sized + Send + 'static,
    {
        Box::pin(self)
    }

    /// Adapt this sequence into a [`futures_core::Stream`] of results.
    fn into_stream(self) -> IntoStream<Self>
    where
        Self: Sized,
    {
        IntoStream { seq: self }
    }
}

impl<T> LazySequence for BoxSequence<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        self.get_mut().as_mut().poll_next(cx)
    }
}

/// Future returned by [`LazySequence::collect`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
#[pin_project::pin_project]
pub struct Collect<S, F> {
    #[pin]
    seq: S,
    consumer: F,
    done: bool,
}

impl<S, F> Future for Collect<S, F>
where
    S: LazySequence,
    F: FnMut(S::Item),
{
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(Ok(()));
        }
        loop {
            match this.seq.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(item))) => (this.consumer)(item),
                Poll::Ready(Some(Err(err))) => {
                    *this.done = true;
                    return Poll::Ready(Err(err));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Stream adapter returned by [`LazySequence::into_stream`].
#[derive(Debug)]
#[pin_project::pin_project]
pub struct IntoStream<S> {
    #[pin]
    seq: S,
}

impl<S: LazySequence> futures_core::Stream for IntoStream<S> {
    type Item = Result<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().seq.poll_next(cx)
    }
}
