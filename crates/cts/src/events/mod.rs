//! Execution history for the control API.

mod model;
mod store;

pub use model::Event;
pub use store::{EventStore, EventStoreError};
