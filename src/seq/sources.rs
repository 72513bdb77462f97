use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_core::Stream;

use super::LazySequence;
use crate::error::Result;

/// Create a cold sequence from a collection or iterator.
///
/// The iterator is not constructed until the first pull.
///
/// # Example
///
/// ```rust
/// use futures_lite::future::block_on;
/// use task_pipeline::seq::{from_iter, LazySequence};
///
/// let mut sum = 0;
/// block_on(from_iter(1..=100).collect(|n| sum += n)).unwrap();
/// assert_eq!(sum, 5050);
/// ```
pub fn from_iter<I: IntoIterator>(source: I) -> FromIter<I> {
    FromIter {
        source: Some(source),
        iter: None,
    }
}

/// Sequence returned by [`from_iter`].
#[pin_project::pin_project]
pub struct FromIter<I: IntoIterator> {
    source: Option<I>,
    iter: Option<I::IntoIter>,
}

impl<I: IntoIterator> fmt::Debug for FromIter<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromIter")
            .field("started", &self.source.is_none())
            .finish_non_exhaustive()
    }
}

impl<I> Clone for FromIter<I>
where
    I: IntoIterator + Clone,
    I::IntoIter: Clone,
{
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            iter: self.iter.clone(),
        }
    }
}

impl<I: IntoIterator> LazySequence for FromIter<I> {
    type Item = I::Item;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Result<I::Item>>> {
        let this = self.project();
        if this.iter.is_none() {
            // Cold start: the iterator is built on the first pull.
            match this.source.take() {
                Some(source) => *this.iter = Some(source.into_iter()),
                None => return Poll::Ready(None),
            }
        }
        let Some(iter) = this.iter.as_mut() else {
            return Poll::Ready(None);
        };
        Poll::Ready(iter.next().map(Ok))
    }
}

/// Adapt any [`futures_core::Stream`] into a lazy sequence.
pub fn from_stream<S: Stream>(stream: S) -> FromStream<S> {
    FromStream { stream }
}

/// Sequence returned by [`from_stream`].
#[derive(Debug, Clone)]
#[pin_project::pin_project]
pub struct FromStream<S> {
    #[pin]
    stream: S,
}

impl<S: Stream> LazySequence for FromStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<S::Item>>> {
        self.project().stream.poll_next(cx).map(|step| step.map(Ok))
    }
}

/// Create a cold sequence from a suspending generator.
///
/// The generator receives an [`Emitter`] and emits values through it;
/// `emit(..).await` suspends the generator until the consumer has pulled the
/// value, so exactly one element is computed per pull. The closure is not
/// invoked until the first pull. Returning `Err` from the generator fails
/// the sequence (see [`LazySequence::catch`]).
///
/// # Example
///
/// ```rust
/// use futures_lite::future::block_on;
/// use task_pipeline::seq::{generate, LazySequence};
///
/// let seq = generate(|emitter| async move {
///     for word in ["fee", "fi", "fo"] {
///         emitter.emit(word).await;
///     }
///     Ok(())
/// });
/// let mut out = Vec::new();
/// block_on(seq.collect(|word| out.push(word))).unwrap();
/// assert_eq!(out, vec!["fee", "fi", "fo"]);
/// ```
pub fn generate<T, F, Fut>(generator: F) -> Generate<T, F, Fut>
where
    F: FnOnce(Emitter<T>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    Generate {
        init: Some(generator),
        fut: None,
        cell: Arc::new(Mutex::new(None)),
        done: false,
    }
}

/// Hand-off side of a [`generate`] sequence.
///
/// The generator's `emit` and the consumer's pull meet at a one-value cell:
/// `emit` parks the generator until the value has been taken.
pub struct Emitter<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

impl<T> Emitter<T> {
    /// Emit one value, suspending until the consumer has pulled it.
    pub fn emit(&self, value: T) -> Emit<'_, T> {
        Emit {
            cell: &self.cell,
            value: Some(value),
        }
    }
}

/// Future returned by [`Emitter::emit`].
#[must_use = "futures do nothing unless polled"]
pub struct Emit<'a, T> {
    cell: &'a Arc<Mutex<Option<T>>>,
    value: Option<T>,
}

impl<T> fmt::Debug for Emit<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emit").finish_non_exhaustive()
    }
}

impl<T> Unpin for Emit<'_, T> {}

impl<T> Future for Emit<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut slot = this.cell.lock().unwrap();
        match this.value.take() {
            Some(value) => {
                // The consumer drained the cell before re-polling us.
                debug_assert!(slot.is_none(), "emit while a value is still pending");
                *slot = Some(value);
                Poll::Pending
            }
            None if slot.is_none() => Poll::Ready(()),
            None => Poll::Pending,
        }
    }
}

/// Sequence returned by [`generate`].
#[pin_project::pin_project]
pub struct Generate<T, F, Fut> {
    init: Option<F>,
    #[pin]
    fut: Option<Fut>,
    cell: Arc<Mutex<Option<T>>>,
    done: bool,
}

impl<T, F, Fut> fmt::Debug for Generate<T, F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generate")
            .field("started", &self.init.is_none())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T, F, Fut> LazySequence for Generate<T, F, Fut>
where
    F: FnOnce(Emitter<T>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        if this.fut.is_none() {
            // Cold start: the generator body runs only now.
            let Some(generator) = this.init.take() else {
                *this.done = true;
                return Poll::Ready(None);
            };
            let emitter = Emitter {
                cell: Arc::clone(this.cell),
            };
            this.fut.as_mut().set(Some(generator(emitter)));
        }

        let Some(fut) = this.fut.as_mut().as_pin_mut() else {
            *this.done = true;
            return Poll::Ready(None);
        };

        match fut.poll(cx) {
            Poll::Ready(outcome) => {
                *this.done = true;
                if let Some(value) = this.cell.lock().unwrap().take() {
                    // A final emit raced completion; deliver it, drop the
                    // outcome only if it was success.
                    if outcome.is_ok() {
                        return Poll::Ready(Some(Ok(value)));
                    }
                }
                match outcome {
                    Ok(()) => Poll::Ready(None),
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
            Poll::Pending => match this.cell.lock().unwrap().take() {
                Some(value) => Poll::Ready(Some(Ok(value))),
                None => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn from_iter_is_cold_and_ordered() {
        let mut out = Vec::new();
        block_on(from_iter(["a", "b", "c"]).collect(|s| out.push(s))).unwrap();
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[test]
    fn generate_computes_one_element_per_pull() {
        let seq = generate(|emitter| async move {
            emitter.emit(1).await;
            emitter.emit(2).await;
            Ok(())
        });
        let mut out = Vec::new();
        block_on(seq.collect(|n| out.push(n))).unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn a_fresh_definition_restarts_from_the_beginning() {
        // Cold semantics: consuming a definition and then rebuilding it
        // replays the generator; nothing is shared between consumptions.
        let build = || from_iter(0..3).map(|n| n * 2);
        let mut first = Vec::new();
        let mut second = Vec::new();
        block_on(build().collect(|n| first.push(n))).unwrap();
        block_on(build().collect(|n| second.push(n))).unwrap();
        assert_eq!(first, second);
    }
}
