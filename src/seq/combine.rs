use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::LazySequence;
use crate::error::Result;

/// A sequence pairing the latest values of two sequences.
///
/// Created by [`LazySequence::combine`]. On each emission from either side
/// the combining function is applied to that value and the most recent value
/// of the other side; nothing is produced until both sides have emitted at
/// least once. The combined sequence completes when both sides have
/// completed (or right away if one side completes without ever emitting).
#[pin_project::pin_project]
pub struct Combine<A: LazySequence, B: LazySequence, F, V> {
    #[pin]
    a: A,
    #[pin]
    b: B,
    f: F,
    latest_a: Option<A::Item>,
    latest_b: Option<B::Item>,
    done_a: bool,
    done_b: bool,
    // Both sides can advance in one pass; the second pairing waits here.
    pending: VecDeque<V>,
}

impl<A, B, F, V> Combine<A, B, F, V>
where
    A: LazySequence,
    A::Item: Clone,
    B: LazySequence,
    B::Item: Clone,
    F: FnMut(&A::Item, &B::Item) -> V,
{
    pub(crate) fn new(a: A, b: B, f: F) -> Self {
        Self {
            a,
            b,
            f,
            latest_a: None,
            latest_b: None,
            done_a: false,
            done_b: false,
            pending: VecDeque::new(),
        }
    }
}

impl<A: LazySequence + fmt::Debug, B: LazySequence + fmt::Debug, F, V> fmt::Debug
    for Combine<A, B, F, V>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combine")
            .field("a", &self.a)
            .field("b", &self.b)
            .field("done_a", &self.done_a)
            .field("done_b", &self.done_b)
            .finish_non_exhaustive()
    }
}

impl<A, B, F, V> LazySequence for Combine<A, B, F, V>
where
    A: LazySequence,
    A::Item: Clone,
    B: LazySequence,
    B::Item: Clone,
    F: FnMut(&A::Item, &B::Item) -> V,
{
    type Item = V;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<V>>> {
        let mut this = self.project();

        loop {
            if let Some(value) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }

            let mut progressed = false;

            if !*this.done_a {
                match this.a.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(item))) => {
                        progressed = true;
                        *this.latest_a = Some(item);
                        if let (Some(a), Some(b)) = (&*this.latest_a, &*this.latest_b) {
                            this.pending.push_back((this.f)(a, b));
                        }
                    }
                    Poll::Ready(Some(Err(err))) => {
                        *this.done_a = true;
                        *this.done_b = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => *this.done_a = true,
                    Poll::Pending => {}
                }
            }

            if !*this.done_b {
                match this.b.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(item))) => {
                        progressed = true;
                        *this.latest_b = Some(item);
                        if let (Some(a), Some(b)) = (&*this.latest_a, &*this.latest_b) {
                            this.pending.push_back((this.f)(a, b));
                        }
                    }
                    Poll::Ready(Some(Err(err))) => {
                        *this.done_a = true;
                        *this.done_b = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => *this.done_b = true,
                    Poll::Pending => {}
                }
            }

            if let Some(value) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }

            // A side that finished without ever emitting can never be paired.
            if (*this.done_a && this.latest_a.is_none())
                || (*this.done_b && this.latest_b.is_none())
                || (*this.done_a && *this.done_b)
            {
                return Poll::Ready(None);
            }

            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{from_iter, LazySequence};
    use futures_lite::future::block_on;

    #[test]
    fn pairs_each_emission_with_the_latest_of_the_other() {
        let a = from_iter([1, 2, 3]);
        let b = from_iter([10, 20]);

        let mut out = Vec::new();
        block_on(a.combine(b, |a, b| (*a, *b)).collect(|pair| out.push(pair))).unwrap();
        assert_eq!(out, vec![(1, 10), (2, 10), (2, 20), (3, 20)]);
    }

    #[test]
    fn no_output_until_both_sides_emit() {
        let a = from_iter([1, 2, 3]);
        let b = from_iter(Vec::<i32>::new());

        let mut out: Vec<i32> = Vec::new();
        block_on(a.combine(b, |a, b| a + b).collect(|n| out.push(n))).unwrap();
        assert!(out.is_empty());
    }
}
