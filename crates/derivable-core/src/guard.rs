//! Deadline-bounded execution of long-running work.
//!
//! The task runs on its own thread while the caller waits on a channel with
//! a timeout. If the deadline passes first the caller gets
//! [`Guarded::TimedOut`] and the thread is detached: it keeps running until
//! it returns on its own, and its result is dropped. Tasks started through
//! [`GuardedExecutor::run_cancellable`] receive a [`CancelFlag`] that is
//! raised on timeout and should be polled at convenient points.

use crate::error::{panic_message, Error, Result};
use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of a deadline-bounded computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded<T> {
    /// The task finished in time.
    Completed(T),
    /// The deadline passed first.
    TimedOut,
}

impl<T> Guarded<T> {
    /// Returns true if the task finished in time.
    pub fn is_completed(&self) -> bool {
        matches!(self, Guarded::Completed(_))
    }

    /// Returns true if the deadline passed first.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Guarded::TimedOut)
    }

    /// Returns the value if the task finished in time.
    pub fn completed(self) -> Option<T> {
        match self {
            Guarded::Completed(value) => Some(value),
            Guarded::TimedOut => None,
        }
    }

    /// Maps the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        match self {
            Guarded::Completed(value) => Guarded::Completed(f(value)),
            Guarded::TimedOut => Guarded::TimedOut,
        }
    }

    /// Borrows the completed value.
    pub fn as_ref(&self) -> Guarded<&T> {
        match self {
            Guarded::Completed(value) => Guarded::Completed(value),
            Guarded::TimedOut => Guarded::TimedOut,
        }
    }

    /// Converts a timeout into [`Error::TimedOut`].
    pub fn into_result(self, timeout: Duration) -> Result<T> {
        match self {
            Guarded::Completed(value) => Ok(value),
            Guarded::TimedOut => Err(Error::TimedOut { timeout }),
        }
    }
}

impl<T> Guarded<Result<T>> {
    /// Swaps `Guarded<Result<T>>` into `Result<Guarded<T>>`.
    pub fn transpose(self) -> Result<Guarded<T>> {
        match self {
            Guarded::Completed(Ok(value)) => Ok(Guarded::Completed(value)),
            Guarded::Completed(Err(err)) => Err(err),
            Guarded::TimedOut => Ok(Guarded::TimedOut),
        }
    }
}

/// Cooperative cancellation signal shared with a guarded task.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once the flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns [`Error::TimedOut`] once the flag has been raised.
    ///
    /// Handy for `?` at checkpoints inside a task.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::TimedOut {
                timeout: Duration::ZERO,
            })
        } else {
            Ok(())
        }
    }
}

/// Runs tasks on a worker thread with a deadline.
#[derive(Debug, Clone)]
pub struct GuardedExecutor {
    timeout: Duration,
    verbose: bool,
}

impl Default for GuardedExecutor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl GuardedExecutor {
    /// Default deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates an executor with the given deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            verbose: false,
        }
    }

    /// Enables start/finish/timeout logging at `info` level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The deadline applied to each task.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `task` with the configured deadline.
    pub fn run<T, F>(&self, task: F) -> Result<Guarded<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run_cancellable(move |_| task())
    }

    /// Runs `task` with the configured deadline, raising its [`CancelFlag`]
    /// if the deadline passes.
    ///
    /// A panic inside the task is reported as [`Error::TaskPanicked`]. The
    /// worker thread is never joined; after a timeout it is left to finish
    /// on its own.
    pub fn run_cancellable<T, F>(&self, task: F) -> Result<Guarded<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancelFlag) -> T + Send + 'static,
    {
        let flag = CancelFlag::new();
        let worker_flag = flag.clone();
        let (tx, rx) = mpsc::channel();

        let started = Instant::now();
        if self.verbose {
            log::info!("guarded task started (deadline {:?})", self.timeout);
        }

        thread::Builder::new()
            .name("derivable-guarded".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(worker_flag)))
                    .map_err(|payload| panic_message(payload.as_ref()));
                // The receiver is gone after a timeout; nothing left to report.
                let _ = tx.send(outcome);
            })
            .map_err(|e| Error::spawn(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => {
                if self.verbose {
                    log::info!("guarded task finished in {:?}", started.elapsed());
                } else {
                    debug!("guarded task finished in {:?}", started.elapsed());
                }
                Ok(Guarded::Completed(value))
            }
            Ok(Err(message)) => Err(Error::task_panicked(message)),
            Err(RecvTimeoutError::Timeout) => {
                flag.cancel();
                warn!(
                    "guarded task exceeded its deadline of {:?}; worker thread abandoned",
                    self.timeout
                );
                Ok(Guarded::TimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::task_panicked(
                "worker thread exited without producing a result",
            )),
        }
    }
}

/// Runs `task` on a worker thread, giving up after `timeout`.
pub fn run_with_deadline<T, F>(task: F, timeout: Duration) -> Result<Guarded<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    GuardedExecutor::new(timeout).run(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fast_task_completes() {
        let out = run_with_deadline(|| 21 * 2, Duration::from_secs(5)).unwrap();
        assert_eq!(out, Guarded::Completed(42));
    }

    #[test]
    fn test_slow_task_times_out_promptly() {
        let start = Instant::now();
        let out = run_with_deadline(
            || {
                thread::sleep(Duration::from_secs(3));
                1
            },
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(out, Guarded::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_flag_is_raised_on_timeout() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let seen = stopped.clone();
        let executor = GuardedExecutor::new(Duration::from_millis(50));
        let out = executor
            .run_cancellable(move |flag| {
                while !flag.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(out.is_timed_out());

        let deadline = Instant::now() + Duration::from_secs(2);
        while stopped.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_task_is_an_error() {
        let err = GuardedExecutor::default()
            .run(|| -> usize { panic!("boom") })
            .unwrap_err();
        match err {
            Error::TaskPanicked { reason } => assert!(reason.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_guarded_helpers() {
        let done: Guarded<Result<u8>> = Guarded::Completed(Ok(3));
        assert_eq!(done.transpose().unwrap(), Guarded::Completed(3));

        let failed: Guarded<Result<u8>> = Guarded::Completed(Err(Error::build("bad")));
        assert!(failed.transpose().is_err());

        let timed_out: Guarded<u8> = Guarded::TimedOut;
        assert!(matches!(
            timed_out.into_result(Duration::from_secs(1)),
            Err(Error::TimedOut { .. })
        ));
        assert_eq!(Guarded::Completed(2).map(|v| v * 2), Guarded::Completed(4));
        assert!(CancelFlag::new().checkpoint().is_ok());
    }
}
