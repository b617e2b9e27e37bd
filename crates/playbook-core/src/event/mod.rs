//! Event bus for playbook lifecycle events.
//!
//! Provides an `EventBus` that distributes `PlaybookEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
