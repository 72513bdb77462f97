use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::LazySequence;
use crate::error::{Error, Result};

/// A sequence that absorbs the failure of its upstream.
///
/// Created by [`LazySequence::catch`]. Strictly local and one-shot: it
/// intercepts exactly one failure from the stages before it, hands the error
/// to the handler, and ends the sequence; the upstream is never resumed past
/// its failure point.
#[derive(Clone)]
#[pin_project::pin_project]
pub struct Catch<S, H> {
    #[pin]
    seq: S,
    handler: Option<H>,
    done: bool,
}

impl<S, H> Catch<S, H> {
    pub(crate) fn new(seq: S, handler: H) -> Self {
        Self {
            seq,
            handler: Some(handler),
            done: false,
        }
    }
}

impl<S: fmt::Debug, H> fmt::Debug for Catch<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catch")
            .field("seq", &self.seq)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<S, H> LazySequence for Catch<S, H>
where
    S: LazySequence,
    H: FnOnce(Error),
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<S::Item>>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match this.seq.poll_next(cx) {
            Poll::Ready(Some(Err(err))) => {
                *this.done = true;
                if let Some(handler) = this.handler.take() {
                    handler(err);
                }
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            step => step,
        }
    }
}
