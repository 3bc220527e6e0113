//! Progress reporting.
//!
//! The patch pipeline never prints. User-facing progress is handed to a
//! [`Reporter`], which the CLI backs with `tracing` and tests back with a
//! [`MemoryReporter`].

use std::sync::{Arc, Mutex};

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A pipeline stage started.
    Progress(String),
    /// A reference was already present in a target and was left alone.
    Skipped { target: String, reference: String },
    /// Informational message, e.g. an ignored watch app or dropped slice.
    Notice(String),
}

/// Sink for [`Event`]s.
pub trait Reporter {
    fn report(&self, event: Event);

    fn progress(&self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.report(Event::Progress(message.into()));
    }
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report(&self, event: Event) {
        (**self).report(event)
    }
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, event: Event) {
        (**self).report(event)
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn report(&self, event: Event) {
        (**self).report(event)
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: Event) {
        match event {
            Event::Progress(message) => tracing::info!("{}", message),
            Event::Skipped { target, reference } => {
                tracing::warn!(%target, %reference, "already patched, skipping")
            }
            Event::Notice(message) => tracing::warn!("{}", message),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<Event>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events reported so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Only the `Skipped` events as `(target, reference)` pairs.
    pub fn skipped(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Skipped { target, reference } => Some((target, reference)),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
