//! The controller: owns every task driver, runs once-mode, and drives
//! the daemon loop's two sub-schedulers.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::driver::{DriverError, TaskDriver};
use crate::engine::ProvisioningEngine;
use crate::error::{Classified, ErrorKind};
use crate::events::Event;
use crate::handler::Handler;
use crate::health::{HealthState, OverallStatus, TaskStatus};
use crate::store::StateStore;
use crate::task::{Condition, TaskConfig};
use crate::view::ViewRegistry;

use super::dynamic;
use super::scheduled;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("task driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("no such task: {0}")]
    UnknownTask(String),
    #[error("task already exists: {0}")]
    TaskAlreadyExists(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("invalid task configuration: {0}")]
    Invalid(String),
}

impl Classified for ControllerError {
    fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::Driver(e) => e.kind(),
            ControllerError::UnknownTask(_) => ErrorKind::Configuration,
            ControllerError::TaskAlreadyExists(_) => ErrorKind::Configuration,
            ControllerError::InvalidSchedule(_) => ErrorKind::Configuration,
            ControllerError::Invalid(_) => ErrorKind::Configuration,
        }
    }
}

/// What a CRUD operation should do beyond installing the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOp {
    /// Install the config only; the task is picked up on the next
    /// scheduling cycle.
    None,
    /// Install the config and run a plan, without applying.
    Inspect,
    /// Install the config and run a full apply immediately.
    Run,
}

/// Owns every task driver and the shared view registry. One instance
/// per process.
pub struct Controller {
    store: Arc<StateStore>,
    view_registry: Arc<ViewRegistry>,
    engine: Arc<dyn ProvisioningEngine>,
    handlers: Vec<Arc<dyn Handler>>,
    drivers: DashMap<String, Arc<TaskDriver>>,
    root_cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        store: Arc<StateStore>,
        view_registry: Arc<ViewRegistry>,
        engine: Arc<dyn ProvisioningEngine>,
        handlers: Vec<Arc<dyn Handler>>,
        root_cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            view_registry,
            engine,
            handlers,
            drivers: DashMap::new(),
            root_cancel,
        }
    }

    fn build_driver(&self, task: TaskConfig) -> Result<Arc<TaskDriver>, ControllerError> {
        let chain = (!self.handlers.is_empty())
            .then(|| crate::handler::HandlerChain::new(self.handlers.clone()));
        let driver = TaskDriver::new(
            task,
            self.engine.clone(),
            self.view_registry.clone(),
            self.store.events().clone(),
            chain,
            &self.root_cancel,
        )?;
        Ok(Arc::new(driver))
    }

    /// Creates a driver per configured, enabled task and runs each
    /// driver's `init`.
    pub async fn init(&self) -> Result<(), ControllerError> {
        for task in self.store.list_tasks() {
            if !task.enabled {
                continue;
            }
            let driver = self.build_driver(task)?;
            driver.init().await?;
            self.drivers.insert(driver.task_name().to_string(), driver);
        }
        Ok(())
    }

    /// Runs every task once, dynamic tasks first in declaration order
    /// then scheduled tasks, returning on the first fatal error.
    pub async fn once(&self) -> Result<(), ControllerError> {
        self.init().await?;

        let mut dynamic_tasks = Vec::new();
        let mut scheduled_tasks = Vec::new();
        for entry in self.drivers.iter() {
            match entry.value().task_config().condition {
                Condition::Dynamic => dynamic_tasks.push(entry.value().clone()),
                Condition::Schedule { .. } => scheduled_tasks.push(entry.value().clone()),
            }
        }

        for driver in dynamic_tasks.into_iter().chain(scheduled_tasks) {
            driver.inspect_task().await?;
            driver.apply_task().await?;
        }
        Ok(())
    }

    /// The daemon loop: spawns one background task per dynamic driver
    /// and one per scheduled driver, then waits for cancellation.
    pub async fn run(&self) -> Result<(), ControllerError> {
        self.init().await?;

        let mut handles = Vec::new();
        for entry in self.drivers.iter() {
            let driver = entry.value().clone();
            // init() only reaches Initialized; apply_task() requires
            // Ready, so every driver needs one inspect before the
            // dynamic/scheduled loops start calling apply_task().
            driver.inspect_task().await?;
            let cancel = self.root_cancel.clone();
            match driver.task_config().condition.clone() {
                Condition::Dynamic => {
                    let changes = self.view_registry.subscribe();
                    handles.push(tokio::spawn(dynamic::run(driver, changes, cancel)));
                }
                Condition::Schedule { cron } => {
                    handles.push(tokio::spawn(async move {
                        if let Err(e) = scheduled::run(driver, cron, cancel).await {
                            tracing::error!(error = %e, "scheduled sub-scheduler exited");
                        }
                    }));
                }
            }
        }

        self.root_cancel.cancelled().await;
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Installs `task`, optionally running a plan or a full apply.
    /// Rejects names already present; use [`Controller::update_task`]
    /// to replace an existing one.
    pub async fn create_task(&self, task: TaskConfig, run_op: RunOp) -> Result<(), ControllerError> {
        task.validate().map_err(ControllerError::Invalid)?;
        if self.drivers.contains_key(&task.name) {
            return Err(ControllerError::TaskAlreadyExists(task.name));
        }
        self.store.set_task(task.clone());
        let driver = self.build_driver(task)?;
        driver.init().await?;
        self.run_op(&driver, run_op).await?;
        self.drivers.insert(driver.task_name().to_string(), driver);
        Ok(())
    }

    /// Replaces an existing task's configuration: tears down the old
    /// driver (keeping its event history) and builds a fresh one.
    pub async fn update_task(&self, task: TaskConfig, run_op: RunOp) -> Result<(), ControllerError> {
        task.validate().map_err(ControllerError::Invalid)?;
        if let Some((_, old)) = self.drivers.remove(&task.name) {
            old.destroy_task(false).await?;
        }
        self.store.set_task(task.clone());
        let driver = self.build_driver(task)?;
        driver.init().await?;
        self.run_op(&driver, run_op).await?;
        self.drivers.insert(driver.task_name().to_string(), driver);
        Ok(())
    }

    async fn run_op(&self, driver: &TaskDriver, run_op: RunOp) -> Result<(), ControllerError> {
        match run_op {
            RunOp::None => Ok(()),
            RunOp::Inspect => {
                driver.inspect_task().await?;
                Ok(())
            }
            RunOp::Run => {
                driver.inspect_task().await?;
                driver.apply_task().await?;
                Ok(())
            }
        }
    }

    /// Flips a task's `enabled` flag. A disabled task keeps its driver
    /// torn down but its config and event history are retained.
    pub async fn set_task_enabled(&self, name: &str, enabled: bool) -> Result<(), ControllerError> {
        let mut task = self
            .store
            .get_task(name)
            .ok_or_else(|| ControllerError::UnknownTask(name.to_string()))?;
        task.enabled = enabled;
        self.store.set_task(task.clone());

        if enabled {
            if !self.drivers.contains_key(name) {
                let driver = self.build_driver(task)?;
                driver.init().await?;
                self.drivers.insert(name.to_string(), driver);
            }
        } else if let Some((_, driver)) = self.drivers.remove(name) {
            driver.destroy_task(false).await?;
        }
        Ok(())
    }

    /// Stops the driver, releases its views, and removes the task from
    /// the store. Recreating a task with the same name afterwards is
    /// permitted.
    pub async fn delete_task(&self, name: &str) -> Result<(), ControllerError> {
        if let Some((_, driver)) = self.drivers.remove(name) {
            driver.destroy_task(true).await?;
        }
        self.store
            .delete_task(name)
            .ok_or_else(|| ControllerError::UnknownTask(name.to_string()))?;
        Ok(())
    }

    pub fn list_tasks(&self) -> Vec<TaskConfig> {
        self.store.list_tasks()
    }

    pub fn get_task(&self, name: &str) -> Option<TaskConfig> {
        self.store.get_task(name)
    }

    /// Most-recent-first event history for one task, bounded at the
    /// event store's retention.
    pub fn task_events(&self, name: &str) -> Vec<Event> {
        self.store.events().read(name)
    }

    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        let task = self.store.get_task(name)?;
        let last_event = self.store.events().read(name).into_iter().next();
        let health = HealthState::from_last_event(last_event.as_ref());
        let services = self
            .drivers
            .get(name)
            .map(|d| d.dependencies().filter_map(service_name).collect())
            .unwrap_or_default();
        Some(TaskStatus {
            name: task.name,
            enabled: task.enabled,
            last_event,
            health,
            providers: task.module.providers,
            services,
        })
    }

    pub fn overall_status(&self) -> OverallStatus {
        let statuses: Vec<TaskStatus> = self
            .store
            .list_tasks()
            .iter()
            .filter_map(|t| self.task_status(&t.name))
            .collect();
        OverallStatus::from_task_statuses(&statuses)
    }

    /// Liveness check distinct from [`Controller::overall_status`]: `Err`
    /// only when a task driver has landed in a terminal failure, not
    /// merely degraded.
    pub fn health_check(&self) -> Result<(), String> {
        for entry in self.drivers.iter() {
            if entry.value().state() == crate::driver::DriverState::Failed {
                return Err(format!("task {} is in a failed state", entry.key()));
            }
        }
        Ok(())
    }
}

fn service_name(dependency: &crate::catalog::Dependency) -> Option<String> {
    use crate::catalog::Dependency;
    match dependency {
        Dependency::ServiceHealthByName { name, .. } => Some(name.clone()),
        Dependency::ServiceHealthByRegex { pattern, .. } => Some(pattern.clone()),
        _ => None,
    }
}
