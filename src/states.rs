//! Lifecycle state shared by every stream implementation.

use crate::invariant_ppt::{assert_invariant, STREAM_EXHAUSTED_STAYS_EXHAUSTED};
use crate::stream::StreamError;

/// Where a stream is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built; the channel map may still change.
    Constructed,
    /// At least one particle has been requested.
    Streaming,
    /// End of data was reported. Terminal.
    Exhausted,
}

/// Phase plus the orthogonal closed flag.
#[derive(Debug, Clone)]
pub struct StreamState {
    name: String,
    phase: Phase,
    closed: bool,
    cancelled: bool,
}

impl StreamState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Constructed,
            closed: false,
            cancelled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_exhausted(&self) -> bool {
        self.phase == Phase::Exhausted
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Gate for every read: `Err(Closed)` after close, `Err(Cancelled)`
    /// after a cancel, `Ok(false)` once exhausted, otherwise moves to
    /// streaming and returns `Ok(true)`.
    pub fn begin_read(&mut self) -> Result<bool, StreamError> {
        if self.closed {
            return Err(StreamError::Closed(self.name.clone()));
        }
        if self.cancelled {
            return Err(StreamError::Cancelled(self.name.clone()));
        }
        match self.phase {
            Phase::Exhausted => Ok(false),
            _ => {
                self.phase = Phase::Streaming;
                Ok(true)
            }
        }
    }

    pub fn exhaust(&mut self) {
        if self.phase != Phase::Exhausted {
            self.phase = Phase::Exhausted;
            assert_invariant(
                STREAM_EXHAUSTED_STAYS_EXHAUSTED,
                !self.closed,
                "only an open stream can reach end of data",
                Some(&self.name),
            );
        }
    }

    /// Latches cancellation and returns the error to report.
    pub fn cancel(&mut self) -> StreamError {
        self.cancelled = true;
        StreamError::Cancelled(self.name.clone())
    }

    /// Marks closed. Returns true on the first call only.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_is_terminal() {
        let mut state = StreamState::new("test");
        assert!(state.begin_read().unwrap());
        state.exhaust();
        assert!(!state.begin_read().unwrap());
        assert!(!state.begin_read().unwrap());
        assert_eq!(state.phase(), Phase::Exhausted);
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let mut state = StreamState::new("test");
        assert!(state.close());
        assert!(!state.close());
        assert!(matches!(state.begin_read(), Err(StreamError::Closed(_))));
    }

    #[test]
    fn cancel_is_terminal() {
        let mut state = StreamState::new("test");
        assert!(state.begin_read().unwrap());
        assert!(matches!(state.cancel(), StreamError::Cancelled(_)));
        for _ in 0..3 {
            assert!(matches!(state.begin_read(), Err(StreamError::Cancelled(_))));
        }
        assert!(state.is_cancelled());
        assert!(!state.is_exhausted());
    }
}
