//! Termination control - one cancellation signal per orchestrated call
//!
//! A call may be stopped by the caller (an external [`AbortSignal`]) or by a
//! wall-clock timeout. [`compose`] merges both sources into a single unified
//! signal that every model call in the turn loop observes, and returns it
//! inside a [`TerminationContext`] whose release tears down the timer and the
//! external subscription exactly once.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Reason reported when a signal was cancelled without one
pub const DEFAULT_ABORT_REASON: &str = "cancelled";

/// Cancellation token that carries the reason it fired
///
/// Clones share state: aborting any clone aborts all of them.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl AbortSignal {
    /// Create a signal that has not fired
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    /// Whether the signal has fired
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason the signal fired, or [`DEFAULT_ABORT_REASON`]
    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string())
    }

    /// Wait until the signal fires
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// Underlying token, for clients that only understand `CancellationToken`
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[derive(Debug, Default)]
struct Teardown {
    timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

/// Unified signal plus its idempotent release
#[derive(Debug)]
pub struct TerminationContext {
    signal: AbortSignal,
    teardown: Mutex<Option<Teardown>>,
}

impl TerminationContext {
    fn noop() -> Self {
        Self {
            signal: AbortSignal::new(),
            teardown: Mutex::new(None),
        }
    }

    /// The unified signal
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Cancel the pending timer and drop the external subscription.
    ///
    /// Returns `true` only for the call that actually performed the teardown.
    /// Also runs on drop.
    pub fn release(&self) -> bool {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match teardown {
            Some(teardown) => {
                if let Some(timer) = teardown.timer {
                    timer.abort();
                }
                if let Some(listener) = teardown.listener {
                    listener.abort();
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for TerminationContext {
    fn drop(&mut self) {
        self.release();
    }
}

/// Merge an optional external signal and an optional timeout into one signal.
///
/// With neither source the returned context never fires and its release does
/// nothing. Otherwise the external signal's state and reason are mirrored
/// and the timeout fires with `"timed out after {N}ms"`.
///
/// Must be called inside a Tokio runtime when either source is given.
pub fn compose(external: Option<&AbortSignal>, timeout: Option<Duration>) -> TerminationContext {
    if external.is_none() && timeout.is_none() {
        return TerminationContext::noop();
    }

    let signal = AbortSignal::new();
    let mut teardown = Teardown::default();

    if let Some(external) = external {
        if external.is_aborted() {
            signal.abort(external.reason());
        } else {
            let external = external.clone();
            let unified = signal.clone();
            teardown.listener = Some(tokio::spawn(async move {
                tokio::select! {
                    _ = external.aborted() => unified.abort(external.reason()),
                    _ = unified.aborted() => {}
                }
            }));
        }
    }

    if let Some(timeout) = timeout {
        if !signal.is_aborted() {
            let unified = signal.clone();
            teardown.timer = Some(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        unified.abort(format!("timed out after {}ms", timeout.as_millis()));
                    }
                    _ = unified.aborted() => {}
                }
            }));
        }
    }

    TerminationContext {
        signal,
        teardown: Mutex::new(Some(teardown)),
    }
}
