//! Fan-out helpers.
//!
//! Remote fan-outs (directory listing into N fetches, N asset copies, N
//! deletes) must not stop at the first failure: every item runs to
//! completion and the caller inspects successes and failures separately.

use futures::future::join_all;
use std::future::Future;

/// Outcome of [`settle_all`], split by result and keyed by the caller's tag.
#[derive(Debug)]
pub struct Settled<K, T, E> {
    pub successes: Vec<(K, T)>,
    pub failures: Vec<(K, E)>,
}

impl<K, T, E> Settled<K, T, E> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T, E> Default for Settled<K, T, E> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Drive every tagged future to completion concurrently, never short-circuiting.
///
/// Both halves of the result preserve the input order.
pub async fn settle_all<K, T, E, F>(tasks: impl IntoIterator<Item = (K, F)>) -> Settled<K, T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let (keys, futures): (Vec<K>, Vec<F>) = tasks.into_iter().unzip();
    let results = join_all(futures).await;
    let mut settled = Settled::default();
    for (key, result) in keys.into_iter().zip(results) {
        match result {
            Ok(value) => settled.successes.push((key, value)),
            Err(err) => settled.failures.push((key, err)),
        }
    }
    settled
}
