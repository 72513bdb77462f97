use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Hand the worker back to the scheduler for one round.
///
/// A suspension point with no other effect: the task is immediately
/// re-queued, giving sibling tasks (and pending cancellation) a chance to
/// run between two stretches of computation.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn suspends_once_then_completes() {
        let mut resumed = false;
        block_on(async {
            yield_now().await;
            resumed = true;
        });
        assert!(resumed);
    }
}
