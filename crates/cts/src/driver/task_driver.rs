//! One task's state machine: init, render, inspect/apply, destroy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backoff::full_jitter;
use crate::catalog::Dependency;
use crate::engine::{EngineError, PlanOutcome, ProvisioningEngine};
use crate::error::{Classified, ErrorKind};
use crate::events::{Event, EventStore, EventStoreError};
use crate::handler::{HandlerChain, HandlerContext, HandlerError};
use crate::task::TaskConfig;
use crate::template::{self, CompileError, RenderOutcome, Renderer, Template};
use crate::view::{ViewHandle, ViewRegistry};

use super::state::DriverState;

const APPLY_RETRY_BASE: std::time::Duration = std::time::Duration::from_secs(3);
const APPLY_RETRY_CAP: std::time::Duration = std::time::Duration::from_secs(60);
const APPLY_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("template compile error: {0}")]
    Template(#[from] CompileError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("handler chain error: {0}")]
    Handler(#[from] HandlerError),
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: DriverState, to: DriverState },
    #[error("apply cancelled")]
    Cancelled,
    #[error("dependency permanently failed: {0}")]
    DependencyFailed(String),
}

impl Classified for DriverError {
    fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Io(_) => ErrorKind::Transient,
            DriverError::Template(e) => e.kind(),
            DriverError::Engine(e) => e.kind(),
            DriverError::Handler(e) => e.kind(),
            DriverError::EventStore(e) => e.kind(),
            DriverError::InvalidTransition { .. } => ErrorKind::Programmer,
            DriverError::Cancelled => ErrorKind::Cancellation,
            DriverError::DependencyFailed(_) => ErrorKind::Dependency,
        }
    }
}

/// One task's lifecycle: compiled template, its views, the
/// provisioning engine, and the post-apply handler chain.
pub struct TaskDriver {
    task: TaskConfig,
    template: Template,
    renderer: Renderer,
    views: HashMap<Dependency, Arc<ViewHandle>>,
    view_registry: Arc<ViewRegistry>,
    engine: Arc<dyn ProvisioningEngine>,
    handler_chain: Option<HandlerChain>,
    event_store: Arc<EventStore>,
    state: parking_lot::Mutex<DriverState>,
    apply_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    working_dir: PathBuf,
    /// Set once a failure event has been recorded for the dependency
    /// currently in permanent failure, so repeated checks don't spam
    /// the event store; cleared once every view recovers.
    dependency_alarm: parking_lot::Mutex<bool>,
}

impl TaskDriver {
    pub fn new(
        task: TaskConfig,
        engine: Arc<dyn ProvisioningEngine>,
        view_registry: Arc<ViewRegistry>,
        event_store: Arc<EventStore>,
        handler_chain: Option<HandlerChain>,
        parent_cancel: &CancellationToken,
    ) -> Result<Self, DriverError> {
        let template = template::compile(&task.template)?;
        let views = template
            .dependencies()
            .iter()
            .map(|dep| (dep.clone(), view_registry.register(dep.clone())))
            .collect();
        let working_dir = PathBuf::from(&task.working_dir);

        Ok(Self {
            task,
            template,
            renderer: Renderer::new(),
            views,
            view_registry,
            engine,
            handler_chain,
            event_store,
            state: parking_lot::Mutex::new(DriverState::New),
            apply_lock: tokio::sync::Mutex::new(()),
            cancel: parent_cancel.child_token(),
            working_dir,
            dependency_alarm: parking_lot::Mutex::new(false),
        })
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    pub fn task_config(&self) -> &TaskConfig {
        &self.task
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.views.keys()
    }

    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    fn transition(&self, next: DriverState) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if *state == next {
            return Ok(());
        }
        if !state.can_transition_to(next) {
            return Err(DriverError::InvalidTransition { from: *state, to: next });
        }
        *state = next;
        Ok(())
    }

    /// Writes module scaffolding and runs the engine's `init`.
    /// Idempotent: calling this after the task is already initialized
    /// is a no-op.
    pub async fn init(&self) -> Result<(), DriverError> {
        if matches!(
            self.state(),
            DriverState::Initialized | DriverState::Ready | DriverState::Running
        ) {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.working_dir).await?;
        self.engine.init(&self.working_dir).await?;
        self.transition(DriverState::Initialized)
    }

    /// Pure over the current view values; no state transition.
    pub fn render_template(&self) -> RenderOutcome {
        let views = &self.views;
        self.renderer
            .render(&self.template, |dep| views.get(dep).and_then(|h| h.value()))
    }

    /// Once-mode: run a plan and move to `Ready` on success.
    pub async fn inspect_task(&self) -> Result<PlanOutcome, DriverError> {
        let outcome = self.engine.plan(&self.working_dir).await?;
        self.transition(DriverState::Ready)?;
        Ok(outcome)
    }

    /// Checks the views backing this task's dependencies for permanent
    /// fetch failure. The task keeps rendering its last-known-good
    /// value; the first observation of a failure records a degraded
    /// event so `task_status` reflects it, and recovery clears the
    /// alarm so a later failure is reported again.
    fn note_dependency_health(&self) -> Result<(), DriverError> {
        let failed = self.views.values().find(|handle| handle.failed());
        let mut alarm = self.dependency_alarm.lock();
        match failed {
            Some(handle) => {
                if !*alarm {
                    *alarm = true;
                    let err = DriverError::DependencyFailed(handle.dependency.label());
                    tracing::error!(task = %self.task.name, error = %err, "dependency degraded");
                    let now = SystemTime::now();
                    self.event_store
                        .append(Event::failure(self.task.name.clone(), now, now, err.to_string()))?;
                }
            }
            None => *alarm = false,
        }
        Ok(())
    }

    /// Applies the task's module, retrying transient engine failures
    /// with exponential backoff. Emits one event per attempt and runs
    /// the handler chain once after a successful apply. At most one
    /// apply is ever in flight for this task.
    pub async fn apply_task(&self) -> Result<(), DriverError> {
        self.note_dependency_health()?;
        let _guard = self.apply_lock.lock().await;
        self.transition(DriverState::Running)?;

        for attempt in 1..=APPLY_MAX_ATTEMPTS {
            if self.cancel.is_cancelled() {
                // Not yet started this attempt: no event, matching the
                // "cancelled applies that never started emit nothing"
                // rule.
                let _ = self.transition(DriverState::Ready);
                return Err(DriverError::Cancelled);
            }

            let start = SystemTime::now();
            let result = self.engine.apply(&self.working_dir, &self.cancel).await;
            let end = SystemTime::now();

            match result {
                Ok(()) => {
                    self.event_store
                        .append(Event::success(self.task.name.clone(), start, end))?;
                    self.transition(DriverState::Ready)?;
                    self.run_handlers().await?;
                    return Ok(());
                }
                Err(EngineError::Cancelled) => {
                    self.event_store.append(Event::failure(
                        self.task.name.clone(),
                        start,
                        end,
                        "apply cancelled",
                    ))?;
                    self.transition(DriverState::Failed)?;
                    return Err(DriverError::Cancelled);
                }
                Err(e) => {
                    self.event_store.append(Event::failure(
                        self.task.name.clone(),
                        start,
                        end,
                        e.to_string(),
                    ))?;

                    if attempt >= APPLY_MAX_ATTEMPTS {
                        self.transition(DriverState::Failed)?;
                        return Err(DriverError::Engine(e));
                    }

                    let delay = full_jitter(APPLY_RETRY_BASE, APPLY_RETRY_CAP, attempt);
                    tracing::warn!(
                        task = %self.task.name,
                        attempt,
                        error = %e,
                        "apply failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            let _ = self.transition(DriverState::Failed);
                            return Err(DriverError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        unreachable!("loop always returns within APPLY_MAX_ATTEMPTS iterations")
    }

    async fn run_handlers(&self) -> Result<(), DriverError> {
        let Some(chain) = &self.handler_chain else {
            return Ok(());
        };
        let ctx = HandlerContext {
            task_name: self.task.name.clone(),
            plan_output: String::new(),
        };
        chain.run(&ctx, &self.cancel).await?;
        Ok(())
    }

    /// Tears down the task: stops its views, cancels in-flight work,
    /// and removes its working directory. Optionally tombstones its
    /// event history.
    pub async fn destroy_task(&self, remove_events: bool) -> Result<(), DriverError> {
        {
            let mut state = self.state.lock();
            if *state == DriverState::Destroyed {
                return Ok(());
            }
            if !state.can_transition_to(DriverState::Destroyed) {
                return Err(DriverError::InvalidTransition {
                    from: *state,
                    to: DriverState::Destroyed,
                });
            }
            *state = DriverState::Destroyed;
        }

        self.cancel.cancel();
        for dependency in self.views.keys() {
            self.view_registry.stop(dependency);
        }

        let _ = tokio::fs::remove_dir_all(&self.working_dir).await;
        self.engine.destroy(&self.working_dir).await?;

        if remove_events {
            self.event_store.delete(&self.task.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FakeCatalogClient;
    use crate::engine::FakeEngine;

    fn driver(task: TaskConfig, engine: Arc<FakeEngine>) -> TaskDriver {
        let client = Arc::new(FakeCatalogClient::new());
        let registry = Arc::new(ViewRegistry::new(client, CancellationToken::new()));
        let events = Arc::new(EventStore::default());
        TaskDriver::new(task, engine, registry, events, None, &CancellationToken::new()).unwrap()
    }

    fn task_config(name: &str, template: &str) -> TaskConfig {
        use crate::task::{BufferPeriodConfig, Condition, ModuleConfig};
        TaskConfig {
            name: name.to_string(),
            enabled: true,
            condition: Condition::Dynamic,
            template: template.to_string(),
            module: ModuleConfig {
                source: "./modules/x".to_string(),
                variables: Default::default(),
                providers: vec![],
            },
            buffer_period: BufferPeriodConfig::default(),
            working_dir: std::env::temp_dir()
                .join(format!("cts-test-{name}"))
                .to_string_lossy()
                .to_string(),
        }
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let engine = Arc::new(FakeEngine::new());
        let d = driver(task_config("t1", r#"{{ nodes }}"#), engine.clone());
        d.init().await.unwrap();
        d.init().await.unwrap();
        assert_eq!(
            engine
                .invocations()
                .iter()
                .filter(|i| matches!(i, crate::engine::Invocation::Init(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn apply_retries_then_succeeds_and_runs_handlers() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_next_applies(2);
        let d = driver(task_config("t2", r#"{{ nodes }}"#), engine.clone());
        d.init().await.unwrap();
        d.inspect_task().await.unwrap();
        let result = d.apply_task().await;
        assert!(result.is_ok());
        assert_eq!(d.state(), DriverState::Ready);
    }

    #[tokio::test]
    async fn apply_exhausting_retries_leaves_driver_failed() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_next_applies(100);
        let d = driver(task_config("t3", r#"{{ nodes }}"#), engine.clone());
        d.init().await.unwrap();
        d.inspect_task().await.unwrap();
        let result = d.apply_task().await;
        assert!(result.is_err());
        assert_eq!(d.state(), DriverState::Failed);
    }

    #[tokio::test]
    async fn destroy_is_terminal() {
        let engine = Arc::new(FakeEngine::new());
        let d = driver(task_config("t4", r#"{{ nodes }}"#), engine);
        d.init().await.unwrap();
        d.destroy_task(false).await.unwrap();
        assert_eq!(d.state(), DriverState::Destroyed);
        assert!(d.destroy_task(false).await.is_ok());
    }
}
