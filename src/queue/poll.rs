//! Blocking-dequeue polling.
//!
//! A dequeue attempt either yields an entry or finds the queue empty. On
//! empty, the poller decides between returning and sleeping according to
//! its [`PollMode`], and the [`Backoff`] schedule picks the sleep length.
//!
//! States: `AcquireLock -> CheckEmpty -> {Return, BackoffSleep -> AcquireLock}`.
//! A deadline adds one more edge, `BackoffSleep -> Return`.

use std::time::{Duration, Instant};

use crate::error::Result;

/// How long a dequeue is willing to wait for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Return as soon as the queue is found empty.
    NonBlocking,
    /// Keep polling until an entry arrives.
    Blocking,
    /// Keep polling until an entry arrives or the deadline passes.
    Until(Instant),
}

/// Linear backoff between empty polls.
///
/// Starts at `initial`; after the n-th retry the wait grows by `n / 10`
/// seconds, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    wait: Duration,
    max: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            wait: initial.min(max),
            max,
            retries: 0,
        }
    }

    /// Number of waits handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.wait;
        self.retries = self.retries.saturating_add(1);
        let step = Duration::from_millis(100).saturating_mul(self.retries);
        self.wait = current.saturating_add(step).min(self.max);
        Some(current)
    }
}

#[derive(Debug)]
enum PollState<T> {
    AcquireLock,
    CheckEmpty(Option<T>),
    BackoffSleep,
    Return(Option<T>),
}

/// Outcome of a polling run.
#[derive(Debug)]
pub(crate) struct Polled<T> {
    pub value: Option<T>,
    pub retries: u32,
}

/// Drive `attempt` until it yields a value or `mode` says to give up.
///
/// `attempt` is one lock-read-delete-commit cycle; errors abort the run
/// immediately, only an empty result is retried.
pub(crate) fn run<T, F>(mode: PollMode, mut backoff: Backoff, mut attempt: F) -> Result<Polled<T>>
where
    F: FnMut() -> Result<Option<T>>,
{
    let mut state = PollState::AcquireLock;
    loop {
        state = match state {
            PollState::AcquireLock => PollState::CheckEmpty(attempt()?),
            PollState::CheckEmpty(Some(value)) => PollState::Return(Some(value)),
            PollState::CheckEmpty(None) => match mode {
                PollMode::NonBlocking => PollState::Return(None),
                PollMode::Blocking | PollMode::Until(_) => PollState::BackoffSleep,
            },
            PollState::BackoffSleep => {
                let remaining = match mode {
                    PollMode::Until(deadline) => {
                        Some(deadline.saturating_duration_since(Instant::now()))
                    }
                    _ => None,
                };
                if remaining.is_some_and(|left| left.is_zero()) {
                    PollState::Return(None)
                } else {
                    let wait = backoff.next().unwrap_or(backoff.max);
                    std::thread::sleep(remaining.map_or(wait, |left| wait.min(left)));
                    PollState::AcquireLock
                }
            }
            PollState::Return(value) => {
                return Ok(Polled {
                    value,
                    retries: backoff.retries(),
                });
            }
        };
    }
}
