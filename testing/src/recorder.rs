//! Handler doubles that record the order in which they ran.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use pagekit_core::{HandlerError, HandlerFuture};
use std::sync::{Arc, Mutex};

/// Shared log written by the handlers it hands out.
///
/// # Example
///
/// ```
/// use pagekit_core::event_bus::{Event, EventBus};
/// use pagekit_testing::EventRecorder;
///
/// static PING: Event<u32> = Event::new("ping");
///
/// # tokio_test::block_on(async {
/// let recorder = EventRecorder::new();
/// let mut builder = EventBus::builder();
/// builder.on(PING, recorder.handler("first"));
/// builder.on(PING, recorder.handler("second"));
///
/// builder.build().emit(PING, &mut 0).await.unwrap();
/// assert_eq!(recorder.entries(), vec!["first", "second"]);
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct EventRecorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl EventRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `label` to the log directly.
    pub fn record(&self, label: impl Into<String>) {
        self.log.lock().unwrap().push(label.into());
    }

    /// A handler that logs `label` and succeeds.
    pub fn handler<P>(&self, label: impl Into<String>) -> impl for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync + 'static
    where
        P: Send + 'static,
    {
        let log = Arc::clone(&self.log);
        let label = label.into();
        move |_payload: &mut P| {
            log.lock().unwrap().push(label.clone());
            Box::pin(async { Ok(()) })
        }
    }

    /// A handler that logs `label` and fails with `message`.
    pub fn failing<P>(
        &self,
        label: impl Into<String>,
        message: impl Into<String>,
    ) -> impl for<'a> Fn(&'a mut P) -> HandlerFuture<'a> + Send + Sync + 'static
    where
        P: Send + 'static,
    {
        let log = Arc::clone(&self.log);
        let label = label.into();
        let message = message.into();
        move |_payload: &mut P| {
            log.lock().unwrap().push(label.clone());
            let message = message.clone();
            Box::pin(async move { Err(HandlerError::Failed(message)) })
        }
    }

    /// Labels logged so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of the first entry equal to `label`.
    #[must_use]
    pub fn position(&self, label: &str) -> Option<usize> {
        self.log.lock().unwrap().iter().position(|entry| entry == label)
    }

    /// Number of entries equal to `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|entry| *entry == label).count()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }
}
