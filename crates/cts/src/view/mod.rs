//! Dependency subscriptions: the registry that shares one
//! long-poll loop per distinct dependency identity across every task
//! that references it.

mod fetch;
mod registry;

pub use registry::{ViewHandle, ViewRegistry};
