//! Thread-safe registry of the active configuration snapshot plus the
//! event store — the sole source of truth for control-API reads.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Config;
use crate::events::EventStore;
use crate::task::TaskConfig;

pub struct StateStore {
    config: parking_lot::RwLock<Config>,
    tasks: DashMap<String, TaskConfig>,
    events: Arc<EventStore>,
}

impl StateStore {
    pub fn new(config: Config) -> Self {
        let tasks = DashMap::new();
        for task in &config.tasks {
            tasks.insert(task.name.clone(), task.clone());
        }
        Self {
            config: parking_lot::RwLock::new(config),
            tasks,
            events: Arc::new(EventStore::default()),
        }
    }

    /// A deep copy of the current configuration; the store is the
    /// sole owner of the canonical value.
    pub fn get_config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn list_tasks(&self) -> Vec<TaskConfig> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get_task(&self, name: &str) -> Option<TaskConfig> {
        self.tasks.get(name).map(|entry| entry.value().clone())
    }

    /// Insert-or-replace keyed on task name. Kept in sync with the
    /// config snapshot's embedded task list so `GetConfig` never
    /// diverges from `ListTasks`/`GetTask`.
    pub fn set_task(&self, task: TaskConfig) {
        self.tasks.insert(task.name.clone(), task.clone());
        let mut config = self.config.write();
        match config.tasks.iter_mut().find(|t| t.name == task.name) {
            Some(existing) => *existing = task,
            None => config.tasks.push(task),
        }
    }

    pub fn delete_task(&self, name: &str) -> Option<TaskConfig> {
        let removed = self.tasks.remove(name).map(|(_, task)| task);
        if removed.is_some() {
            self.config.write().tasks.retain(|t| t.name != name);
        }
        removed
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }
}
