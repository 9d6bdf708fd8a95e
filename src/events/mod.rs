//! Event distribution
//!
//! The engine publishes `EngineEvent`s on an `EventBus`; the console renderer
//! and the run tracker are ordinary subscribers.

pub mod bus;
pub mod console;

pub use bus::{EventBus, Listener, Subscription};
pub use console::{attach_console_renderer, render_event};
