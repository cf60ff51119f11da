//! Post-apply handler chain.

mod chain;
mod commit;

pub use chain::{Handler, HandlerChain, HandlerContext, HandlerError};
pub use commit::{CommitExecutor, CommitHandler};
