//! Scriptable provisioning-engine double for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::process::{EngineError, PlanOutcome, ProvisioningEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Init(PathBuf),
    Plan(PathBuf),
    Apply(PathBuf),
    Destroy(PathBuf),
}

/// Records every call made to it and can be scripted to fail the next
/// `N` applies before succeeding, so driver retry logic can be
/// exercised deterministically.
pub struct FakeEngine {
    invocations: Mutex<Vec<Invocation>>,
    apply_failures_remaining: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            apply_failures_remaining: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_applies(&self, count: usize) {
        self.apply_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvisioningEngine for FakeEngine {
    async fn init(&self, working_dir: &Path) -> Result<(), EngineError> {
        self.invocations.lock().push(Invocation::Init(working_dir.to_path_buf()));
        Ok(())
    }

    async fn plan(&self, working_dir: &Path) -> Result<PlanOutcome, EngineError> {
        self.invocations.lock().push(Invocation::Plan(working_dir.to_path_buf()));
        Ok(PlanOutcome {
            summary: "1 to add, 0 to change, 0 to destroy.".to_string(),
            has_changes: true,
        })
    }

    async fn apply(
        &self,
        working_dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.invocations.lock().push(Invocation::Apply(working_dir.to_path_buf()));
        let remaining = self.apply_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.apply_failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::NonZeroExit { status: 1 });
        }
        Ok(())
    }

    async fn destroy(&self, working_dir: &Path) -> Result<(), EngineError> {
        self.invocations.lock().push(Invocation::Destroy(working_dir.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_count_down_then_succeed() {
        let engine = FakeEngine::new();
        engine.fail_next_applies(2);
        let dir = Path::new("/tmp/task");
        let cancel = CancellationToken::new();
        assert!(engine.apply(dir, &cancel).await.is_err());
        assert!(engine.apply(dir, &cancel).await.is_err());
        assert!(engine.apply(dir, &cancel).await.is_ok());
        assert_eq!(engine.invocations().len(), 3);
    }
}
