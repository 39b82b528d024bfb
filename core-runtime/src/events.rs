//! # Event Bus System
//!
//! Process-wide publish/subscribe channel for authentication lifecycle events.
//!
//! ## Overview
//!
//! The event bus lets the authenticated API client announce session changes
//! (`auth:login`, `auth:logout`, `auth:refresh:failed`) to interested parties
//! (navigation, notifications) without depending on them. It offers two ways to
//! listen:
//!
//! - **Handlers** registered with [`EventBus::on`] for a given event name. They run
//!   synchronously inside [`EventBus::emit`], in registration order.
//! - **Streams** obtained from [`EventBus::subscribe`], backed by
//!   `tokio::sync::broadcast`, for consumers living in their own task.
//!
//! Neither path persists events: late subscribers see only what is emitted after
//! they subscribed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐   on(name)    ┌─────────┐
//! │ RefreshCoordinator├─────────>│           ├──────────────>│ Handler │
//! └──────────────────┘           │ EventBus  │               └─────────┘
//! ┌──────────────────┐   emit    │           │   subscribe   ┌─────────┐
//! │ RequestPipeline  ├──────────>│           ├──────────────>│ Stream  │
//! └──────────────────┘           └───────────┘               └─────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, EventBus, LogoutReason, LOGOUT};
//!
//! let bus = EventBus::new(100);
//! let subscription = bus.on(LOGOUT, |event| {
//!     if let AuthEvent::Logout { reason } = event {
//!         println!("session ended: {}", reason);
//!     }
//! });
//!
//! bus.emit(AuthEvent::Logout { reason: LogoutReason::Unauthorized });
//! subscription.unsubscribe();
//! ```
//!
//! ## Error Handling
//!
//! Streams use `tokio::sync::broadcast`, which can produce two types of errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::debug;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::RecvError;
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Stream subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Wire name of [`AuthEvent::Login`].
pub const LOGIN: &str = "auth:login";
/// Wire name of [`AuthEvent::Logout`].
pub const LOGOUT: &str = "auth:logout";
/// Wire name of [`AuthEvent::RefreshFailed`].
pub const REFRESH_FAILED: &str = "auth:refresh:failed";

// ============================================================================
// Event Types
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogoutReason {
    /// The server rejected the credentials and they could not be renewed.
    #[serde(rename = "unauthorized")]
    Unauthorized,
    /// The user asked to sign out.
    #[serde(rename = "user")]
    UserInitiated,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::Unauthorized => "unauthorized",
            LogoutReason::UserInitiated => "user",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A session was established by login or registration.
    #[serde(rename = "auth:login")]
    Login,
    /// The session ended and stored credentials were cleared.
    #[serde(rename = "auth:logout")]
    Logout {
        /// What ended the session.
        reason: LogoutReason,
    },
    /// A credential refresh attempt failed.
    #[serde(rename = "auth:refresh:failed")]
    RefreshFailed,
}

impl AuthEvent {
    /// Wire name used for handler registration.
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::Login => LOGIN,
            AuthEvent::Logout { .. } => LOGOUT,
            AuthEvent::RefreshFailed => REFRESH_FAILED,
        }
    }

    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &'static str {
        match self {
            AuthEvent::Login => "User signed in",
            AuthEvent::Logout { .. } => "User signed out",
            AuthEvent::RefreshFailed => "Credential refresh failed",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            AuthEvent::Login => EventSeverity::Info,
            AuthEvent::Logout {
                reason: LogoutReason::UserInitiated,
            } => EventSeverity::Info,
            AuthEvent::Logout { .. } => EventSeverity::Warning,
            AuthEvent::RefreshFailed => EventSeverity::Error,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Handler Registry
// ============================================================================

type Handler = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

struct Registration {
    id: u64,
    name: String,
    handler: Handler,
}

#[derive(Default)]
struct HandlerRegistry {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    fn insert(&mut self, name: &str, handler: Handler) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.registrations.push(Registration {
            id,
            name: name.to_string(),
            handler,
        });
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    fn matching(&self, name: &str) -> Vec<Handler> {
        self.registrations
            .iter()
            .filter(|r| r.name == name)
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }
}

fn lock(registry: &Mutex<HandlerRegistry>) -> std::sync::MutexGuard<'_, HandlerRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`EventBus::on`].
///
/// Dropping the handle (or calling [`unsubscribe`](Subscription::unsubscribe))
/// removes the handler. Use [`detach`](Subscription::detach) to keep the handler
/// for the lifetime of the bus.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<HandlerRegistry>>,
    active: bool,
}

impl Subscription {
    /// Removes the handler from the bus.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keeps the handler registered after this handle goes away.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to auth events.
///
/// Cloning the bus yields another handle to the same channel.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{AuthEvent, EventBus};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let mut stream = event_bus.subscribe();
///
/// event_bus.emit(AuthEvent::Login);
/// assert_eq!(stream.recv().await.unwrap(), AuthEvent::Login);
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AuthEvent>,
    handlers: Arc<Mutex<HandlerRegistry>>,
}

impl EventBus {
    /// Creates a new event bus with the specified stream buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per stream subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
        }
    }

    /// Registers `handler` for events whose [`AuthEvent::name`] equals `name`.
    ///
    /// Handlers run synchronously on the emitting task, so they should be quick
    /// and must not block.
    pub fn on<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = lock(&self.handlers).insert(name, Arc::new(handler));
        debug!(event = name, subscription = id, "Handler subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.handlers),
            active: true,
        }
    }

    /// Publishes an event to every current handler and stream subscriber.
    ///
    /// Handlers registered for the event's name are invoked in registration
    /// order before this method returns. The registry lock is not held while
    /// handlers run, so a handler may subscribe or unsubscribe.
    ///
    /// Returns the number of handlers and streams the event was delivered to.
    pub fn emit(&self, event: AuthEvent) -> usize {
        let handlers = lock(&self.handlers).matching(event.name());

        for handler in &handlers {
            handler(&event);
        }

        let streamed = self.sender.send(event.clone()).unwrap_or(0);

        debug!(
            event = event.name(),
            handlers = handlers.len(),
            streams = streamed,
            "Event emitted"
        );

        handlers.len() + streamed
    }

    /// Creates a new stream subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<AuthEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns the number of handlers registered for `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        lock(&self.handlers)
            .registrations
            .iter()
            .filter(|r| r.name == name)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("handler_count", &lock(&self.handlers).registrations.len())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&AuthEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{AuthEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let logouts = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, AuthEvent::Logout { .. }));
/// ```
pub struct EventStream {
    receiver: Receiver<AuthEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<AuthEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AuthEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &AuthEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<AuthEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<AuthEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unauthorized() -> AuthEvent {
        AuthEvent::Logout {
            reason: LogoutReason::Unauthorized,
        }
    }

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.handler_count(LOGOUT), 0);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(AuthEvent::Login.name(), "auth:login");
        assert_eq!(unauthorized().name(), "auth:logout");
        assert_eq!(AuthEvent::RefreshFailed.name(), "auth:refresh:failed");
    }

    #[test]
    fn test_emission_without_listeners_is_not_an_error() {
        let bus = EventBus::new(10);
        assert_eq!(bus.emit(AuthEvent::Login), 0);
    }

    #[test]
    fn test_handler_receives_matching_events_only() {
        let bus = EventBus::new(10);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _subscription = bus.on(LOGOUT, move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        assert_eq!(bus.emit(AuthEvent::Login), 0);
        assert_eq!(bus.emit(unauthorized()), 1);

        assert_eq!(*seen.lock().unwrap(), vec![unauthorized()]);
    }

    #[test]
    fn test_handlers_run_synchronously_in_registration_order() {
        let bus = EventBus::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let _a = bus.on(LOGIN, move |_| first.lock().unwrap().push("first"));
        let second = Arc::clone(&order);
        let _b = bus.on(LOGIN, move |_| second.lock().unwrap().push("second"));

        bus.emit(AuthEvent::Login);

        // Delivered before emit returned
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let subscription = bus.on(REFRESH_FAILED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(AuthEvent::RefreshFailed);
        subscription.unsubscribe();
        bus.emit(AuthEvent::RefreshFailed);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(REFRESH_FAILED), 0);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::new(10);
        {
            let _subscription = bus.on(LOGIN, |_| {});
            assert_eq!(bus.handler_count(LOGIN), 1);
        }
        assert_eq!(bus.handler_count(LOGIN), 0);
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let bus = EventBus::new(10);
        bus.on(LOGIN, |_| {}).detach();
        assert_eq!(bus.handler_count(LOGIN), 1);
    }

    #[test]
    fn test_handler_may_subscribe_reentrantly() {
        let bus = EventBus::new(10);
        let inner_bus = bus.clone();
        let _subscription = bus.on(LOGIN, move |_| {
            inner_bus.on(LOGOUT, |_| {}).detach();
        });

        bus.emit(AuthEvent::Login);
        assert_eq!(bus.handler_count(LOGOUT), 1);
    }

    #[tokio::test]
    async fn test_stream_and_handler_both_receive() {
        let bus = EventBus::new(10);
        let mut stream = bus.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _subscription = bus.on(LOGIN, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(AuthEvent::Login), 2);
        assert_eq!(stream.recv().await.unwrap(), AuthEvent::Login);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        bus.emit(unauthorized());

        assert_eq!(sub1.recv().await.unwrap(), unauthorized());
        assert_eq!(sub2.recv().await.unwrap(), unauthorized());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let bus = EventBus::new(10);
        let _early = bus.subscribe();
        bus.emit(AuthEvent::Login);

        let mut late = EventStream::new(bus.subscribe());
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, AuthEvent::Logout { .. }));

        bus.emit(AuthEvent::Login);
        bus.emit(unauthorized());

        assert_eq!(stream.recv().await.unwrap(), unauthorized());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for _ in 0..5 {
            bus.emit(AuthEvent::RefreshFailed);
        }

        match sub.recv().await {
            Err(RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("Expected Lagged error, got {:?}", other),
        }
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(AuthEvent::Login.severity(), EventSeverity::Info);
        assert_eq!(unauthorized().severity(), EventSeverity::Warning);
        assert_eq!(AuthEvent::RefreshFailed.severity(), EventSeverity::Error);
        assert_eq!(
            AuthEvent::Logout {
                reason: LogoutReason::UserInitiated
            }
            .severity(),
            EventSeverity::Info
        );
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(unauthorized()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "event": "auth:logout", "reason": "unauthorized" })
        );

        let login = serde_json::to_value(AuthEvent::Login).unwrap();
        assert_eq!(login, serde_json::json!({ "event": "auth:login" }));

        let parsed: AuthEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, unauthorized());
    }

    #[test]
    fn test_logout_reason_display() {
        assert_eq!(LogoutReason::Unauthorized.to_string(), "unauthorized");
        assert_eq!(LogoutReason::UserInitiated.to_string(), "user");
    }

    #[tokio::test]
    async fn test_try_recv_with_event() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());

        bus.emit(AuthEvent::Login);

        let result = stream.try_recv();
        assert!(matches!(result, Some(Ok(AuthEvent::Login))));
    }
}
