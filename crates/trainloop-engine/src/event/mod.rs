//! Internal event plumbing: the broadcast fabric bus.

pub mod bus;

pub use bus::EventBus;
