//! In-process event bus connecting the rendering pipeline to modules.
//!
//! Modules never call each other. Every extension point of the pipeline is a
//! named event, and modules subscribe handlers to the events they care about
//! while they boot. The pipeline then emits those events with a mutable payload
//! that handlers enrich in turn.
//!
//! # Architecture
//!
//! ```text
//!  boot                                request
//! ┌────────────────────┐             ┌────────────────────────────┐
//! │ module.startup()   │             │ dispatcher / renderer      │
//! │   builder.on(..)   │──build()──▶ │   bus.emit(event, &mut p)  │
//! │   builder.on(..)   │             │     handler 1 (awaited)    │
//! └────────────────────┘             │     handler 2 (awaited)    │
//!                                    │     ...                    │
//!                                    └────────────────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Typed keys**: an [`Event<P>`] couples a wire name with its payload type
//! - **Boot barrier**: handlers are registered on an [`EventBusBuilder`]; the
//!   frozen [`EventBus`] has no registration API at all
//! - **Sequential delivery**: handlers run one at a time in registration order,
//!   so handler N observes every mutation made by handler N-1
//! - **Fail loudly**: the first failing handler stops the emit and the error
//!   is returned to the emitter
//! - **Scoped delivery**: handlers may be scoped to a shortcode name so that
//!   they only see emits for that shortcode
//!
//! # Example
//!
//! ```
//! use pagekit_core::event_bus::{Event, EventBus};
//!
//! static COUNTED: Event<u32> = Event::new("counted");
//!
//! # tokio_test::block_on(async {
//! let mut builder = EventBus::builder();
//! builder.on(COUNTED, |count: &mut u32| {
//!     Box::pin(async move {
//!         *count += 1;
//!         Ok(())
//!     })
//! });
//! let bus = builder.build();
//!
//! let mut count = 0;
//! bus.emit(COUNTED, &mut count).await.unwrap();
//! assert_eq!(count, 1);
//! # });
//! ```

use crate::services::DataServiceError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by event handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Errors raised by an event handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler rejected the payload or could not complete its work
    #[error("Handler failed: {0}")]
    Failed(String),

    /// A Data Service call made by the handler failed
    #[error("Data service error: {0}")]
    DataService(#[from] DataServiceError),

    /// Any other error, with context
    #[error("{context}: {source}")]
    Other {
        /// What the handler was doing
        context: String,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl HandlerError {
    /// Create a [`HandlerError::Failed`] from any message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors returned by [`EventBus::emit`].
#[derive(Error, Debug)]
pub enum EmitError {
    /// A handler failed; the remaining handlers of that emit were not run
    #[error("Handler #{index} for event '{event}' failed: {source}")]
    HandlerFailed {
        /// Name of the event being emitted
        event: &'static str,
        /// Registration index of the failing handler
        index: usize,
        /// The handler's error
        #[source]
        source: HandlerError,
    },
}

impl EmitError {
    /// Name of the event whose handler failed.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::HandlerFailed { event, .. } => event,
        }
    }
}

/// A typed event key: a wire name plus the payload type handlers receive.
///
/// Keys are `const`-constructible so that events can be declared as
/// constants and shared between emitters and modules.
pub struct Event<P> {
    name: &'static str,
    _payload: PhantomData<fn(&mut P)>,
}

impl<P> Event<P> {
    /// Declare an event with the given wire name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    /// The event's wire name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<P> Clone for Event<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Event<P> {}

impl<P> fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Event").field(&self.name).finish()
    }
}

impl<P> PartialEq for Event<P> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<P> Eq for Event<P> {}

/// An asynchronous handler for events carrying payload `P`.
///
/// Closures of the shape `|payload: &mut P| Box::pin(async move { .. })`
/// implement this trait automatically.
pub trait EventHandler<P>: Send + Sync {
    /// Handle one emit, mutating the shared payload as needed.
    fn handle<'a>(&'a self, payload: &'a mut P) -> HandlerFuture<'a>;
}

impl<P, F> EventHandler<P> for F
where
    F: for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync,
{
    fn handle<'a>(&'a self, payload: &'a mut P) -> HandlerFuture<'a> {
        self(payload)
    }
}

struct Subscription<P> {
    scope: Option<String>,
    handler: Arc<dyn EventHandler<P>>,
}

impl<P> Subscription<P> {
    fn accepts(&self, scope: Option<&str>) -> bool {
        match (&self.scope, scope) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        }
    }
}

type SubscriptionKey = (&'static str, TypeId);
type SubscriptionTable = HashMap<SubscriptionKey, Box<dyn Any + Send + Sync>>;

fn key_of<P: 'static>(event: Event<P>) -> SubscriptionKey {
    (event.name, TypeId::of::<P>())
}

/// Collects subscriptions while modules boot.
///
/// Call [`build`](Self::build) once every module has registered to obtain the
/// immutable [`EventBus`].
#[derive(Default)]
pub struct EventBusBuilder {
    subscriptions: SubscriptionTable,
}

impl EventBusBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a broadcast handler, delivered on every emit of `event`.
    pub fn on<P, F>(&mut self, event: Event<P>, handler: F) -> &mut Self
    where
        P: Send + 'static,
        F: for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.subscribe(event, None, Arc::new(handler))
    }

    /// Register a handler delivered only for emits scoped to `scope`.
    ///
    /// Scopes are shortcode names and are compared case-insensitively.
    pub fn on_scoped<P, F>(&mut self, event: Event<P>, scope: &str, handler: F) -> &mut Self
    where
        P: Send + 'static,
        F: for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.subscribe(event, Some(scope), Arc::new(handler))
    }

    /// Register an already boxed handler, optionally scoped.
    pub fn subscribe<P>(
        &mut self,
        event: Event<P>,
        scope: Option<&str>,
        handler: Arc<dyn EventHandler<P>>,
    ) -> &mut Self
    where
        P: Send + 'static,
    {
        let entry = self
            .subscriptions
            .entry(key_of(event))
            .or_insert_with(|| Box::new(Vec::<Subscription<P>>::new()));

        // The key embeds the payload's TypeId, so the downcast cannot miss.
        if let Some(list) = (**entry).downcast_mut::<Vec<Subscription<P>>>() {
            list.push(Subscription {
                scope: scope.map(str::to_uppercase),
                handler,
            });
        }
        self
    }

    /// Number of handlers registered so far for `event`.
    #[must_use]
    pub fn handler_count<P: Send + 'static>(&self, event: Event<P>) -> usize {
        self.subscriptions
            .get(&key_of(event))
            .and_then(|entry| entry.downcast_ref::<Vec<Subscription<P>>>())
            .map_or(0, Vec::len)
    }

    /// Freeze the registrations into an [`EventBus`].
    #[must_use]
    pub fn build(self) -> EventBus {
        EventBus {
            subscriptions: Arc::new(self.subscriptions),
        }
    }
}

impl fmt::Debug for EventBusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusBuilder")
            .field("events", &self.subscriptions.len())
            .finish()
    }
}

/// The frozen, process-wide event bus.
///
/// Cloning is cheap: clones share the same subscription table.
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<SubscriptionTable>,
}

impl EventBus {
    /// Start collecting subscriptions.
    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    fn subscriptions<P: Send + 'static>(&self, event: Event<P>) -> &[Subscription<P>] {
        match self
            .subscriptions
            .get(&key_of(event))
            .and_then(|entry| entry.downcast_ref::<Vec<Subscription<P>>>())
        {
            Some(list) => list.as_slice(),
            None => &[],
        }
    }

    /// Emit `event` to its broadcast handlers.
    ///
    /// Handlers are awaited one after another in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::HandlerFailed`] for the first handler that fails;
    /// handlers registered after it are not run.
    pub async fn emit<P: Send + 'static>(
        &self,
        event: Event<P>,
        payload: &mut P,
    ) -> Result<(), EmitError> {
        self.dispatch(event, None, payload).await
    }

    /// Emit `event` to its broadcast handlers and to handlers scoped to `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::HandlerFailed`] for the first handler that fails.
    pub async fn emit_scoped<P: Send + 'static>(
        &self,
        event: Event<P>,
        scope: &str,
        payload: &mut P,
    ) -> Result<(), EmitError> {
        self.dispatch(event, Some(scope), payload).await
    }

    async fn dispatch<P: Send + 'static>(
        &self,
        event: Event<P>,
        scope: Option<&str>,
        payload: &mut P,
    ) -> Result<(), EmitError> {
        for (index, subscription) in self.subscriptions(event).iter().enumerate() {
            if !subscription.accepts(scope) {
                continue;
            }
            subscription
                .handler
                .handle(payload)
                .await
                .map_err(|source| EmitError::HandlerFailed {
                    event: event.name(),
                    index,
                    source,
                })?;
        }
        Ok(())
    }

    /// Number of handlers (broadcast and scoped) registered for `event`.
    #[must_use]
    pub fn handler_count<P: Send + 'static>(&self, event: Event<P>) -> usize {
        self.subscriptions(event).len()
    }

    /// Whether any handler is registered for `event`.
    #[must_use]
    pub fn has_handlers<P: Send + 'static>(&self, event: Event<P>) -> bool {
        !self.subscriptions(event).is_empty()
    }

    /// Names of all events with at least one handler, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.subscriptions.keys().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Payload {
        steps: Vec<&'static str>,
        x: Option<u32>,
    }

    static STEP: Event<Payload> = Event::new("step");
    static OTHER: Event<Payload> = Event::new("other");
    static SAME_NAME_OTHER_TYPE: Event<u32> = Event::new("step");

    #[tokio::test]
    async fn emit_without_handlers_is_noop() {
        let bus = EventBus::builder().build();
        let mut payload = Payload::default();

        bus.emit(STEP, &mut payload).await.unwrap();

        assert!(payload.steps.is_empty());
        assert!(!bus.has_handlers(STEP));
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order_and_see_prior_mutations() {
        let mut builder = EventBus::builder();
        builder.on(STEP, |p: &mut Payload| {
            Box::pin(async move {
                p.x = Some(1);
                p.steps.push("a");
                Ok(())
            })
        });
        builder.on(STEP, |p: &mut Payload| {
            Box::pin(async move {
                if p.x == Some(1) {
                    p.steps.push("b saw x");
                }
                Ok(())
            })
        });
        let bus = builder.build();

        let mut payload = Payload::default();
        bus.emit(STEP, &mut payload).await.unwrap();

        assert_eq!(payload.steps, vec!["a", "b saw x"]);
    }

    #[tokio::test]
    async fn failing_handler_aborts_remaining_handlers() {
        let mut builder = EventBus::builder();
        builder.on(STEP, |_p: &mut Payload| {
            Box::pin(async move { Err(HandlerError::failed("boom")) })
        });
        builder.on(STEP, |p: &mut Payload| {
            Box::pin(async move {
                p.steps.push("never");
                Ok(())
            })
        });
        let bus = builder.build();

        let mut payload = Payload::default();
        let err = bus.emit(STEP, &mut payload).await.unwrap_err();

        assert_eq!(err.event(), "step");
        assert!(matches!(err, EmitError::HandlerFailed { index: 0, .. }));
        assert!(payload.steps.is_empty());
    }

    #[tokio::test]
    async fn failure_does_not_poison_the_bus() {
        let attempts = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&attempts);

        let mut builder = EventBus::builder();
        builder.on(STEP, move |_p: &mut Payload| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let mut guard = counter.lock().unwrap();
                *guard += 1;
                if *guard == 1 {
                    return Err(HandlerError::failed("first call fails"));
                }
                Ok(())
            })
        });
        builder.on(OTHER, |p: &mut Payload| {
            Box::pin(async move {
                p.steps.push("other");
                Ok(())
            })
        });
        let bus = builder.build();

        let mut payload = Payload::default();
        assert!(bus.emit(STEP, &mut payload).await.is_err());
        assert!(bus.emit(STEP, &mut payload).await.is_ok());
        bus.emit(OTHER, &mut payload).await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(payload.steps, vec!["other"]);
    }

    #[tokio::test]
    async fn scoped_handlers_only_receive_matching_scope() {
        let mut builder = EventBus::builder();
        builder.on_scoped(STEP, "ALERT", |p: &mut Payload| {
            Box::pin(async move {
                p.steps.push("alert");
                Ok(())
            })
        });
        builder.on_scoped(STEP, "faq", |p: &mut Payload| {
            Box::pin(async move {
                p.steps.push("faq");
                Ok(())
            })
        });
        builder.on(STEP, |p: &mut Payload| {
            Box::pin(async move {
                p.steps.push("broadcast");
                Ok(())
            })
        });
        let bus = builder.build();

        let mut payload = Payload::default();
        bus.emit_scoped(STEP, "FAQ", &mut payload).await.unwrap();
        assert_eq!(payload.steps, vec!["faq", "broadcast"]);

        let mut unscoped = Payload::default();
        bus.emit(STEP, &mut unscoped).await.unwrap();
        assert_eq!(unscoped.steps, vec!["broadcast"]);
    }

    #[tokio::test]
    async fn payload_type_is_part_of_the_key() {
        let mut builder = EventBus::builder();
        builder.on(SAME_NAME_OTHER_TYPE, |n: &mut u32| {
            Box::pin(async move {
                *n += 10;
                Ok(())
            })
        });
        let bus = builder.build();

        let mut payload = Payload::default();
        bus.emit(STEP, &mut payload).await.unwrap();
        let mut n = 1;
        bus.emit(SAME_NAME_OTHER_TYPE, &mut n).await.unwrap();

        assert!(payload.steps.is_empty());
        assert_eq!(n, 11);
        assert_eq!(bus.handler_count(STEP), 0);
        assert_eq!(bus.handler_count(SAME_NAME_OTHER_TYPE), 1);
        assert_eq!(bus.event_names(), vec!["step"]);
    }

    #[test]
    fn builder_counts_handlers() {
        let mut builder = EventBus::builder();
        builder
            .on(STEP, |_p: &mut Payload| Box::pin(async move { Ok(()) }))
            .on(STEP, |_p: &mut Payload| Box::pin(async move { Ok(()) }));

        assert_eq!(builder.handler_count(STEP), 2);
        assert_eq!(builder.handler_count(OTHER), 0);
    }
}
