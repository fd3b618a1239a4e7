// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Bounded retries for calls to external discovery services.
//!
//! The shape follows the usual builder: configure a [`Retry`], then hand
//! [`Retry::retry_async`] a closure that makes one attempt. Unlike an
//! open-ended retry loop, every policy here is bounded in both the number of
//! tries and the time each try may take, because bootstrap must eventually
//! reach the launch stage.

use std::cmp;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// The state of a retry operation, passed to each attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    /// The zero-based index of this attempt.
    pub i: usize,
}

/// The error from an operation whose tries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The last attempt failed.
    #[error("{0}")]
    Failed(E),
    /// The last attempt did not finish within the attempt timeout.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Configures a retry operation.
#[derive(Debug, Clone)]
pub struct Retry {
    initial_backoff: Duration,
    factor: f64,
    clamp_backoff: Duration,
    max_tries: usize,
    attempt_timeout: Option<Duration>,
}

impl Default for Retry {
    /// Three tries, starting at a 500ms backoff that doubles up to 5s, with
    /// no per-attempt timeout.
    fn default() -> Retry {
        Retry {
            initial_backoff: Duration::from_millis(500),
            factor: 2.0,
            clamp_backoff: Duration::from_secs(5),
            max_tries: 3,
            attempt_timeout: None,
        }
    }
}

impl Retry {
    /// Sets the backoff before the second attempt.
    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Retry {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Sets the multiplier applied to the backoff after each attempt.
    pub fn factor(mut self, factor: f64) -> Retry {
        self.factor = factor;
        self
    }

    /// Sets the largest backoff between two attempts.
    pub fn clamp_backoff(mut self, clamp_backoff: Duration) -> Retry {
        self.clamp_backoff = clamp_backoff;
        self
    }

    /// Sets the number of attempts. Zero is treated as one.
    pub fn max_tries(mut self, max_tries: usize) -> Retry {
        self.max_tries = cmp::max(max_tries, 1);
        self
    }

    /// Bounds the duration of each attempt.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Retry {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Runs `f` until it succeeds or the tries run out, returning the last
    /// error in the latter case.
    pub async fn retry_async<F, U, T, E>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryState) -> U,
        U: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.retry_async_if(f, |_| true).await
    }

    /// Like [`Retry::retry_async`], but gives up at the first error for which
    /// `retryable` returns false.
    pub async fn retry_async_if<F, U, T, E, P>(
        &self,
        mut f: F,
        retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(RetryState) -> U,
        U: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut backoff = self.initial_backoff;
        let mut i = 0;
        loop {
            let next_backoff = (i + 1 < self.max_tries).then_some(backoff);
            let attempt = f(RetryState { i });
            let result = match self.attempt_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result.map_err(RetryError::Failed),
                    Err(_) => Err(RetryError::TimedOut(timeout)),
                },
                None => attempt.await.map_err(RetryError::Failed),
            };
            match (result, next_backoff) {
                (Ok(value), _) => return Ok(value),
                (Err(RetryError::Failed(e)), Some(_)) if !retryable(&e) => {
                    return Err(RetryError::Failed(e));
                }
                (Err(e), None) => return Err(e),
                (Err(e), Some(wait)) => {
                    debug!(attempt = i + 1, "retrying in {wait:?}: {e}");
                    tokio::time::sleep(wait).await;
                    backoff = cmp::min(backoff.mul_f64(self.factor), self.clamp_backoff);
                    i += 1;
                }
            }
        }
    }
}
