pub mod events;
pub mod fetcher;
pub mod model;
pub mod monitor;
pub mod progress;
pub(crate) mod transport;
pub mod trigger;
