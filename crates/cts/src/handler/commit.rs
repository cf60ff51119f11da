//! A vendor-specific post-apply commit handler: calls out to an
//! external commit operation and treats a recognized "nothing to
//! commit" response as success rather than failure.

use async_trait::async_trait;

use super::chain::{Handler, HandlerContext, HandlerError};

/// Abstracts the vendor call itself so the handler's retry/empty-commit
/// logic can be tested without a live dependency.
#[async_trait]
pub trait CommitExecutor: Send + Sync {
    async fn commit(&self, task_name: &str) -> Result<String, String>;
}

/// Runs [`CommitExecutor::commit`] after apply. Consul-Terraform-Sync's
/// source treats a response beginning with a known "no changes" prefix
/// as a successful no-op rather than retrying it as a failure.
pub struct CommitHandler<E> {
    executor: E,
    empty_commit_prefix: String,
}

impl<E: CommitExecutor> CommitHandler<E> {
    pub fn new(executor: E, empty_commit_prefix: impl Into<String>) -> Self {
        Self {
            executor,
            empty_commit_prefix: empty_commit_prefix.into(),
        }
    }
}

#[async_trait]
impl<E: CommitExecutor + Send + Sync> Handler for CommitHandler<E> {
    fn name(&self) -> &str {
        "commit"
    }

    async fn do_handle(
        &self,
        ctx: &HandlerContext,
        prev_err: Option<&HandlerError>,
    ) -> Result<(), HandlerError> {
        match self.executor.commit(&ctx.task_name).await {
            Ok(output) if output.starts_with(&self.empty_commit_prefix) => {
                tracing::debug!(task = %ctx.task_name, "commit handler observed an empty commit");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(message) => Err(HandlerError::Failed {
                handler: self.name().to_string(),
                message,
                source: prev_err.map(|e| Box::new(HandlerError::Failed {
                    handler: "previous".to_string(),
                    message: e.to_string(),
                    source: None,
                })),
            }),
        }
    }
}
