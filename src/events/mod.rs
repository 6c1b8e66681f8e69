//! Notice system for observers of the chat layer
//!
//! This module provides:
//! - `ChatNotice`: typed notices emitted after every visible state change
//! - `EventBus`: broadcast channel distributing notices to observers
//! - `ErrorThrottle`: de-duplication of repeated error notices

mod bus;
mod throttle;
mod types;

pub use bus::EventBus;
pub use throttle::ErrorThrottle;
pub use types::{ChatNotice, EventEmitter};
