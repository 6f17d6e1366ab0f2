#![forbid(unsafe_code)]

//! Event bus for the barbiton asset pipeline.

mod asset;
mod bus;
mod event;
mod net;

pub use asset::AssetEvent;
pub use bus::EventBus;
pub use event::Event;
pub use net::NetEvent;
