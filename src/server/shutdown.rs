//! Graceful-shutdown bookkeeping.
//!
//! The tracker counts in-flight requests and carries the "shutdown requested"
//! signal. Once shutdown is requested, every new request except the admin
//! route is turned away with 503; requests already admitted run to completion.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;

use super::routing::{ApiError, SHUTDOWN_PATH};
use crate::error::ServerError;

pub struct ShutdownTracker {
    requested: watch::Sender<bool>,
    in_flight: watch::Sender<usize>,
}

/// Marks one admitted request; released on drop.
///
/// The middleware hands it to the handler through the request extensions, so
/// the count stays up until the handler's blocking work is done even when the
/// client hangs up first.
pub struct InFlight {
    tracker: Arc<ShutdownTracker>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.tracker.in_flight.send_modify(|n| *n -= 1);
    }
}

impl ShutdownTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requested: watch::Sender::new(false),
            in_flight: watch::Sender::new(0),
        })
    }

    /// Ask for a shutdown. Returns `false` if one was already requested.
    pub fn request_shutdown(&self) -> bool {
        !self.requested.send_replace(true)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.requested.borrow()
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Admit a request, or `None` once shutdown has been requested.
    ///
    /// The count goes up before the flag is checked, so a drain that starts
    /// after the flag is set never misses an admitted request.
    pub fn enter(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight.send_modify(|n| *n += 1);
        let guard = InFlight {
            tracker: Arc::clone(self),
        };
        if self.is_shutting_down() {
            return None;
        }
        Some(guard)
    }

    /// Resolve once shutdown has been requested.
    pub async fn requested(&self) {
        let mut rx = self.requested.subscribe();
        // The sender lives in `self`, so this only ends on `true`.
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Wait until no request is in flight, up to `timeout`. Returns whether
    /// the drain completed.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let mut rx = self.in_flight.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .is_ok()
    }
}

/// Middleware admitting requests while the server is live.
pub async fn track_requests(
    State(tracker): State<Arc<ShutdownTracker>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == SHUTDOWN_PATH {
        return next.run(request).await;
    }
    let Some(in_flight) = tracker.enter() else {
        return ApiError(ServerError::ShuttingDown.into()).into_response();
    };
    request.extensions_mut().insert(Arc::new(in_flight));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admitted_requests_delay_drain() {
        let tracker = ShutdownTracker::new();
        let guard = tracker.enter().unwrap();
        assert!(tracker.request_shutdown());
        assert!(!tracker.request_shutdown());
        assert!(tracker.enter().is_none());
        assert_eq!(tracker.in_flight(), 1);

        assert!(!tracker.drained(Duration::from_millis(50)).await);
        drop(guard);
        assert!(tracker.drained(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn shared_guard_holds_until_last_owner() {
        let tracker = ShutdownTracker::new();
        let guard = Arc::new(tracker.enter().unwrap());
        let handler_side = Arc::clone(&guard);
        drop(guard);
        assert_eq!(tracker.in_flight(), 1);
        drop(handler_side);
        assert!(tracker.drained(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn requested_resolves_after_request() {
        let tracker = ShutdownTracker::new();
        let waiter = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.requested().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        tracker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
