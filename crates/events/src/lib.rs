//! Knowledge-base event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`KbEvent`]: the event envelope; [`EventPayload`] says what happened.
//! - [`EventLogger`]: background service that logs every event.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, EventPayload, KbEvent};
pub use logger::EventLogger;
