use std::pin::Pin;
use std::task::{Context, Poll};

use super::LazySequence;
use crate::error::Result;

/// A sequence that yields at most `n` elements of another sequence.
///
/// Created by [`LazySequence::take`]. Once the budget is spent the upstream
/// is never polled again, so no element beyond what is consumed is computed.
#[derive(Debug, Clone)]
#[pin_project::pin_project]
pub struct Take<S> {
    #[pin]
    seq: S,
    remaining: usize,
}

impl<S> Take<S> {
    pub(crate) fn new(seq: S, n: usize) -> Self {
        Self { seq, remaining: n }
    }
}

impl<S: LazySequence> LazySequence for Take<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<S::Item>>> {
        let this = self.project();
        if *this.remaining == 0 {
            return Poll::Ready(None);
        }
        match this.seq.poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => {
                *this.remaining -= 1;
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(err))) => {
                *this.remaining = 0;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                *this.remaining = 0;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{generate, LazySequence};
    use futures_lite::future::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn never_computes_past_the_budget() {
        let emissions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&emissions);
        // An infinite generator with a side effect per emission.
        let seq = generate(move |emitter| async move {
            let mut n = 0u64;
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                emitter.emit(n).await;
                n += 1;
            }
        });

        let mut out = Vec::new();
        block_on(seq.take(2).collect(|n| out.push(n))).unwrap();
        assert_eq!(out, vec![0, 1]);
        assert_eq!(emissions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn take_zero_never_polls_upstream() {
        let touched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&touched);
        let seq = generate(move |emitter| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.emit(1).await;
            Ok(())
        });

        let mut out: Vec<i32> = Vec::new();
        block_on(seq.take(0).collect(|n| out.push(n))).unwrap();
        assert!(out.is_empty());
        assert_eq!(touched.load(Ordering::SeqCst), 0);
    }
}
