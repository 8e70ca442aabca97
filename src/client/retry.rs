//! Retry policy for extension clients.
//!
//! Each client has an [`ErrorHandler`] that decides whether to keep going after
//! a runtime error, retry a failed initialization, or reconnect a closed
//! transport. Reconnect decisions are driven by a [`RetryWindow`] of recent
//! attempt timestamps, shared by every client of the same extension for the
//! lifetime of the process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::error::InitializationError;
use crate::extensions::ExtensionId;

/// Number of attempt timestamps kept per extension.
pub const RETRY_WINDOW_CAPACITY: usize = 4;

/// A full window spanning at most this long means the extension is flapping.
pub const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Attempts closer together than this back off harder.
pub const FAST_RETRY_THRESHOLD: Duration = Duration::from_secs(10);

pub const FAST_RETRY_DELAY: Duration = Duration::from_millis(2500);
pub const SLOW_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Runtime errors tolerated per session before the client is shut down.
pub const MAX_RUNTIME_ERRORS: u32 = 5;

/// Error text meaning the peer went away while we were still talking to it.
const PEER_UNSUBSCRIBED: &str = "got unsubscribed";

/// JSON-RPC "invalid request" error code.
const INVALID_REQUEST: i64 = -32600;
const ALREADY_INITIALIZED: &str = "client proxy handler is already initialized";

/// Bounded FIFO of recent connection attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryWindow {
    attempts: VecDeque<Instant>,
}

impl RetryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.attempts.len() >= RETRY_WINDOW_CAPACITY
    }

    pub fn attempts(&self) -> impl Iterator<Item = &Instant> {
        self.attempts.iter()
    }

    /// Time between the oldest and newest attempt.
    pub fn span(&self) -> Option<Duration> {
        match (self.attempts.front(), self.attempts.back()) {
            (Some(oldest), Some(newest)) => Some(newest.duration_since(*oldest)),
            _ => None,
        }
    }

    /// Record an attempt at `now` and return how long to wait before it.
    ///
    /// Attempts in quick succession of the previous one wait longer.
    pub fn record(&mut self, now: Instant) -> Duration {
        let delay = match self.attempts.back() {
            Some(last) if now.duration_since(*last) <= FAST_RETRY_THRESHOLD => FAST_RETRY_DELAY,
            _ => SLOW_RETRY_DELAY,
        };

        if self.is_full() {
            self.attempts.pop_front();
        }
        self.attempts.push_back(now);
        delay
    }
}

/// Shared handle to one extension's retry window.
pub type SharedRetryWindow = Arc<Mutex<RetryWindow>>;

/// What to do after a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    ShutDown,
}

/// What to do after a failed initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationAction {
    DoNotRetry,
    RetryAfter(Duration),
}

/// What to do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    DoNotReconnect,
    Reconnect(Duration),
}

/// Per-client failure policy.
#[derive(Debug)]
pub struct ErrorHandler {
    extension_id: ExtensionId,

    window: SharedRetryWindow,

    /// Runtime errors seen in the current session.
    error_count: u32,
}

impl ErrorHandler {
    pub fn new(extension_id: impl Into<ExtensionId>, window: SharedRetryWindow) -> Self {
        Self {
            extension_id: extension_id.into(),
            window,
            error_count: 0,
        }
    }

    /// Start counting runtime errors afresh for a new session.
    pub fn reset_session(&mut self) {
        self.error_count = 0;
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// A runtime error during an active session.
    pub fn error(&mut self, message: &str) -> ErrorAction {
        self.error_count += 1;
        tracing::error!(
            extension = %self.extension_id,
            count = self.error_count,
            "Extension error: {}",
            message
        );

        if message.contains(PEER_UNSUBSCRIBED) {
            return ErrorAction::ShutDown;
        }
        if self.error_count <= MAX_RUNTIME_ERRORS {
            ErrorAction::Continue
        } else {
            ErrorAction::ShutDown
        }
    }

    /// The session failed before becoming active.
    pub fn initialization_failed(&mut self, err: &InitializationError) -> InitializationAction {
        tracing::error!(
            extension = %self.extension_id,
            error = %err,
            "Extension failed to initialize"
        );

        if is_permanent(err) {
            return InitializationAction::DoNotRetry;
        }

        if matches!(err, InitializationError::Response { retry: true, .. })
            && self.with_window(|w| w.is_empty())
        {
            tracing::debug!(extension = %self.extension_id, "Extension asked to be retried");
        }
        InitializationAction::RetryAfter(self.compute_delay())
    }

    /// The transport closed.
    pub fn closed(&mut self) -> CloseAction {
        let flapping = self.with_window(|w| {
            w.is_full() && w.span().is_some_and(|span| span <= RESTART_WINDOW)
        });

        if flapping {
            tracing::error!(
                extension = %self.extension_id,
                "Extension connection closed {} times in the last {} seconds, not reconnecting",
                RETRY_WINDOW_CAPACITY,
                RESTART_WINDOW.as_secs()
            );
            return CloseAction::DoNotReconnect;
        }

        let delay = self.compute_delay();
        tracing::warn!(
            extension = %self.extension_id,
            delay_ms = delay.as_millis() as u64,
            "Extension connection closed, reconnecting"
        );
        CloseAction::Reconnect(delay)
    }

    /// Record an attempt now and return the delay before making it.
    pub fn compute_delay(&self) -> Duration {
        self.with_window(|w| w.record(Instant::now()))
    }

    fn with_window<T>(&self, f: impl FnOnce(&mut RetryWindow) -> T) -> T {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut window)
    }
}

/// Failures that retrying can't fix.
fn is_permanent(err: &InitializationError) -> bool {
    match err {
        InitializationError::ConnectionRefused(_) => true,
        InitializationError::Response { code, message, .. } => {
            (message.contains("dial tcp") && message.contains("connect: connection refused"))
                || (*code == INVALID_REQUEST && message.contains(ALREADY_INITIALIZED))
        }
        InitializationError::Connect(_) | InitializationError::Closed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ErrorHandler {
        ErrorHandler::new("acme/go", Arc::new(Mutex::new(RetryWindow::new())))
    }

    fn response(code: i64, message: &str, retry: bool) -> InitializationError {
        InitializationError::Response {
            code,
            message: message.to_string(),
            retry,
        }
    }

    #[test]
    fn test_six_runtime_errors() {
        let mut handler = handler();
        let decisions: Vec<_> = (0..6).map(|i| handler.error(&format!("oops {}", i))).collect();
        assert_eq!(&decisions[..5], &[ErrorAction::Continue; 5]);
        assert_eq!(decisions[5], ErrorAction::ShutDown);
    }

    #[test]
    fn test_unsubscribed_shuts_down_immediately() {
        let mut handler = handler();
        assert_eq!(
            handler.error("subscriber got unsubscribed"),
            ErrorAction::ShutDown
        );
    }

    #[test]
    fn test_reset_session_restarts_count() {
        let mut handler = handler();
        for _ in 0..5 {
            handler.error("e");
        }
        handler.reset_session();
        assert_eq!(handler.error("e"), ErrorAction::Continue);
        assert_eq!(handler.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_initialization_failures() {
        let mut handler = handler();
        assert_eq!(
            handler.initialization_failed(&InitializationError::ConnectionRefused("x".into())),
            InitializationAction::DoNotRetry
        );
        assert_eq!(
            handler.initialization_failed(&response(
                -32000,
                "dial tcp 10.0.0.1:80: connect: connection refused",
                false
            )),
            InitializationAction::DoNotRetry
        );
        assert_eq!(
            handler.initialization_failed(&response(
                -32600,
                "client proxy handler is already initialized",
                false
            )),
            InitializationAction::DoNotRetry
        );
        // Same text under another code is retryable.
        assert!(matches!(
            handler.initialization_failed(&response(
                -32603,
                "client proxy handler is already initialized",
                false
            )),
            InitializationAction::RetryAfter(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_initialization_failures() {
        let mut handler = handler();
        assert_eq!(
            handler.initialization_failed(&response(-32000, "busy", true)),
            InitializationAction::RetryAfter(SLOW_RETRY_DELAY)
        );
        assert_eq!(
            handler.initialization_failed(&InitializationError::Closed),
            InitializationAction::RetryAfter(FAST_RETRY_DELAY)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_compute_delay_fast_and_slow() {
        let handler = handler();
        assert_eq!(handler.compute_delay(), SLOW_RETRY_DELAY);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(handler.compute_delay(), FAST_RETRY_DELAY);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(handler.compute_delay(), SLOW_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_evicts_oldest() {
        let window = Arc::new(Mutex::new(RetryWindow::new()));
        let handler = ErrorHandler::new("acme/go", window.clone());
        let first = Instant::now();
        for _ in 0..6 {
            handler.compute_delay();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        let window = window.lock().unwrap();
        assert_eq!(window.len(), RETRY_WINDOW_CAPACITY);
        assert_eq!(
            window.attempts().next().map(|t| t.duration_since(first)),
            Some(Duration::from_secs(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_flapping_within_minute() {
        let mut handler = handler();
        for _ in 0..4 {
            handler.compute_delay();
            tokio::time::advance(Duration::from_secs(20)).await;
        }
        // Four attempts spanning 60s.
        assert_eq!(handler.closed(), CloseAction::DoNotReconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_slow_restarts_reconnect() {
        let mut handler = handler();
        for _ in 0..4 {
            handler.compute_delay();
            tokio::time::advance(Duration::from_secs(21)).await;
        }
        // Four attempts spanning 63s; last one was 21s ago.
        assert_eq!(handler.closed(), CloseAction::Reconnect(SLOW_RETRY_DELAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_before_window_full() {
        let mut handler = handler();
        assert_eq!(handler.closed(), CloseAction::Reconnect(SLOW_RETRY_DELAY));
        assert_eq!(handler.closed(), CloseAction::Reconnect(FAST_RETRY_DELAY));
        assert_eq!(handler.closed(), CloseAction::Reconnect(FAST_RETRY_DELAY));
        assert_eq!(handler.closed(), CloseAction::Reconnect(FAST_RETRY_DELAY));
        // Window is now full and spans 0s.
        assert_eq!(handler.closed(), CloseAction::DoNotReconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_shared_across_handlers() {
        let window = Arc::new(Mutex::new(RetryWindow::new()));
        let first = ErrorHandler::new("acme/go", window.clone());
        first.compute_delay();
        drop(first);

        let second = ErrorHandler::new("acme/go", window.clone());
        assert_eq!(second.compute_delay(), FAST_RETRY_DELAY);
        assert_eq!(window.lock().unwrap().len(), 2);
    }
}
