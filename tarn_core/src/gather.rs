//! Running a batch of futures with a deterministic start order.

use crate::error::{Error, Result};
use futures_util::future::{MaybeDone, maybe_done};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Await every task, starting them in input order.
///
/// Each task is identified by a key; passing the same key twice is an
/// error and nothing is started. The returned future polls every pending
/// task in input order on each wake-up, so the first poll of task `n`
/// always happens before the first poll of task `n + 1`. Completion order
/// is whatever the tasks make it, but results come back in input order.
pub fn stable_gather<K, F, I>(tasks: I) -> Result<StableGather<F>>
where
    I: IntoIterator<Item = (K, F)>,
    K: Eq + Hash + fmt::Debug,
    F: Future,
{
    let mut seen = HashSet::new();
    let mut futures = Vec::new();
    for (key, future) in tasks {
        if seen.contains(&key) {
            return Err(Error::DuplicateTask {
                key: format!("{:?}", key),
            });
        }
        seen.insert(key);
        futures.push(Box::pin(maybe_done(future)));
    }
    Ok(StableGather { futures })
}

/// Future returned by [`stable_gather`].
#[must_use = "futures do nothing unless polled"]
pub struct StableGather<F: Future> {
    futures: Vec<Pin<Box<MaybeDone<F>>>>,
}

impl<F: Future> Future for StableGather<F> {
    type Output = Vec<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut done = true;
        for future in self.futures.iter_mut() {
            if future.as_mut().poll(cx).is_pending() {
                done = false;
            }
        }
        if !done {
            return Poll::Pending;
        }
        let outputs = self
            .futures
            .iter_mut()
            .filter_map(|future| future.as_mut().take_output())
            .collect();
        Poll::Ready(outputs)
    }
}

impl<F: Future> fmt::Debug for StableGather<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableGather")
            .field("tasks", &self.futures.len())
            .finish()
    }
}
