//! Post-apply handler chain: ordered, composable side effects that
//! run after a successful apply, each owning its own retry policy.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backoff::full_jitter;
use crate::error::{Classified, ErrorKind};

const RETRY_BASE: std::time::Duration = std::time::Duration::from_secs(1);
const RETRY_CAP: std::time::Duration = std::time::Duration::from_secs(30);

/// What a handler needs to know about the apply it's reacting to.
pub struct HandlerContext {
    pub task_name: String,
    pub plan_output: String,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler \"{handler}\" failed: {message}")]
    Failed {
        handler: String,
        message: String,
        #[source]
        source: Option<Box<HandlerError>>,
    },
    #[error("handler chain cancelled")]
    Cancelled,
}

impl Classified for HandlerError {
    fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Failed { .. } => ErrorKind::Transient,
            HandlerError::Cancelled => ErrorKind::Cancellation,
        }
    }
}

/// One post-apply action. `do_handle` receives the previous handler's
/// error (if any) so implementations can wrap it and preserve the
/// causal chain rather than discarding it.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn do_handle(
        &self,
        ctx: &HandlerContext,
        prev_err: Option<&HandlerError>,
    ) -> Result<(), HandlerError>;

    fn max_attempts(&self) -> u32 {
        4
    }
}

/// Runs each handler in sequence, retrying an individual handler on
/// its own failure before giving up and moving on with the
/// accumulated error passed to the next handler.
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }

    pub async fn run(
        &self,
        ctx: &HandlerContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let mut prev_err: Option<HandlerError> = None;

        for handler in &self.handlers {
            let mut attempt = 0;
            loop {
                attempt += 1;
                if cancel.is_cancelled() {
                    return Err(HandlerError::Cancelled);
                }

                match handler.do_handle(ctx, prev_err.as_ref()).await {
                    Ok(()) => {
                        prev_err = None;
                        break;
                    }
                    Err(e) if attempt >= handler.max_attempts() => {
                        tracing::error!(
                            handler = handler.name(),
                            attempts = attempt,
                            error = %e,
                            "handler exhausted its retries"
                        );
                        prev_err = Some(e);
                        break;
                    }
                    Err(e) => {
                        let delay = full_jitter(RETRY_BASE, RETRY_CAP, attempt);
                        tracing::warn!(
                            handler = handler.name(),
                            attempt,
                            error = %e,
                            "handler failed, retrying"
                        );
                        prev_err = Some(e);
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        match prev_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyHandler {
        name: String,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl Handler for FlakyHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn max_attempts(&self) -> u32 {
            4
        }

        async fn do_handle(
            &self,
            _ctx: &HandlerContext,
            _prev_err: Option<&HandlerError>,
        ) -> Result<(), HandlerError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(HandlerError::Failed {
                    handler: self.name.clone(),
                    message: "not yet".to_string(),
                    source: None,
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn succeeds_after_retrying_within_max_attempts() {
        let handler = Arc::new(FlakyHandler {
            name: "commit".to_string(),
            fail_times: AtomicUsize::new(2),
        });
        let chain = HandlerChain::new(vec![handler]);
        let ctx = HandlerContext {
            task_name: "t".to_string(),
            plan_output: String::new(),
        };
        let result = chain.run(&ctx, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_the_last_error() {
        let handler = Arc::new(FlakyHandler {
            name: "commit".to_string(),
            fail_times: AtomicUsize::new(100),
        });
        let chain = HandlerChain::new(vec![handler]);
        let ctx = HandlerContext {
            task_name: "t".to_string(),
            plan_output: String::new(),
        };
        let result = chain.run(&ctx, &CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_chain() {
        let handler = Arc::new(FlakyHandler {
            name: "commit".to_string(),
            fail_times: AtomicUsize::new(100),
        });
        let chain = HandlerChain::new(vec![handler]);
        let ctx = HandlerContext {
            task_name: "t".to_string(),
            plan_output: String::new(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = chain.run(&ctx, &cancel).await;
        assert!(matches!(result, Err(HandlerError::Cancelled)));
    }
}
