//! Control signals shared between a consumer thread and running streams.
//!
//! Cancellation is cooperative: sources and drain helpers poll a
//! [`CancelToken`] between particles (every N particles, configurable) and
//! return [`StreamError::Cancelled`](crate::stream::StreamError::Cancelled)
//! once it has fired. Progress is reported between batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default number of particles between cancellation polls.
pub const DEFAULT_CANCEL_CHECK_INTERVAL: usize = 1024;

/// Cloneable cancellation flag. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Cannot be undone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Polls a token every `interval` calls to [`CancelCheck::tick`].
#[derive(Debug, Clone)]
pub struct CancelCheck {
    token: CancelToken,
    interval: usize,
    counter: usize,
    fired: bool,
}

impl CancelCheck {
    pub fn new(token: CancelToken, interval: usize) -> Self {
        Self {
            token,
            interval: interval.max(1),
            counter: 0,
            fired: false,
        }
    }

    /// Returns true once the token has been seen cancelled, and on every
    /// tick after that.
    pub fn tick(&mut self) -> bool {
        if self.fired {
            return true;
        }
        self.counter += 1;
        if self.counter >= self.interval {
            self.counter = 0;
            self.fired = self.token.is_cancelled();
        }
        self.fired
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

/// Receives progress updates while a stream is drained.
pub trait ProgressReporter {
    /// `done` particles of `total` (`-1` when unknown). Returning false
    /// requests cancellation.
    fn report(&mut self, done: i64, total: i64) -> bool;
}

impl<F> ProgressReporter for F
where
    F: FnMut(i64, i64) -> bool,
{
    fn report(&mut self, done: i64, total: i64) -> bool {
        self(done, total)
    }
}

/// Ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(&mut self, _done: i64, _total: i64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn check_polls_on_interval() {
        let token = CancelToken::new();
        token.cancel();
        let mut check = CancelCheck::new(token, 3);
        assert!(!check.tick());
        assert!(!check.tick());
        assert!(check.tick());
        assert!(check.tick());
        assert!(check.tick());
    }

    #[test]
    fn closure_reporter() {
        let mut seen = Vec::new();
        let mut reporter = |done: i64, total: i64| {
            seen.push((done, total));
            done < 2
        };
        assert!(reporter.report(1, 4));
        assert!(!reporter.report(2, 4));
        assert_eq!(seen, vec![(1, 4), (2, 4)]);
    }
}
