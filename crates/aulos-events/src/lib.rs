#![forbid(unsafe_code)]

//! Decoder lifecycle events and the bus that fans them out.

pub use bus::EventBus;
pub use event::DecoderEvent;

mod bus;
mod event;
