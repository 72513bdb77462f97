use std::pin::Pin;
use std::task::{Context, Poll};

use super::LazySequence;
use crate::error::Result;

/// A sequence that maps the values of another sequence with a function.
///
/// Created by [`LazySequence::map`]; inert until collected.
#[derive(Debug, Clone)]
#[pin_project::pin_project]
pub struct Map<S, F> {
    #[pin]
    seq: S,
    f: F,
}

impl<S, F> Map<S, F> {
    pub(crate) fn new(seq: S, f: F) -> Self {
        Self { seq, f }
    }
}

impl<S, F, U> LazySequence for Map<S, F>
where
    S: LazySequence,
    F: FnMut(S::Item) -> U,
{
    type Item = U;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<U>>> {
        let this = self.project();
        this.seq
            .poll_next(cx)
            .map(|step| step.map(|result| result.map(this.f)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{from_iter, LazySequence};
    use futures_lite::future::block_on;

    #[test]
    fn maps_each_element() {
        let mut out = Vec::new();
        block_on(from_iter([1, 2, 3]).map(|n| n * 2).collect(|n| out.push(n))).unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }
}
