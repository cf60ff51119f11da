//! The provisioning-engine boundary and its test double.

mod process;

#[cfg(test)]
mod fake;

pub use process::{EngineError, PlanOutcome, ProvisioningEngine, SubprocessEngine};

#[cfg(test)]
pub use fake::{FakeEngine, Invocation};
