//! The task definition: the unit an operator configures and the
//! controller drives.

use serde::{Deserialize, Serialize};

/// What triggers a task's apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Triggered by changes to any view in the template's dependency
    /// set, subject to the buffer period.
    Dynamic,
    /// Triggered by a cron expression; re-renders are still dynamic,
    /// but apply only fires on the schedule.
    Schedule { cron: String },
}

/// Per-task coalescing window. Disabled means "apply immediately on
/// every change".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferPeriodConfig {
    pub enabled: bool,
    #[serde(with = "seconds_duration")]
    pub min: std::time::Duration,
    #[serde(with = "seconds_duration")]
    pub max: std::time::Duration,
}

impl Default for BufferPeriodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min: std::time::Duration::from_secs(5),
            max: std::time::Duration::from_secs(20),
        }
    }
}

impl BufferPeriodConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.min > self.max {
            return Err(format!(
                "buffer period min ({:?}) exceeds max ({:?})",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Source template + input-variable bindings for the module this task
/// applies. The module's own contents are opaque to the core; only
/// the working directory and variable bindings are its concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub source: String,
    #[serde(default)]
    pub variables: std::collections::BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub providers: Vec<String>,
}

/// One task: the unique, immutable-keyed unit of work the controller
/// schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub condition: Condition,
    /// Raw template source compiled by [`crate::template`].
    pub template: String,
    pub module: ModuleConfig,
    #[serde(default)]
    pub buffer_period: BufferPeriodConfig,
    pub working_dir: String,
}

fn default_true() -> bool {
    true
}

impl TaskConfig {
    /// A dynamic task must declare at least one dependency-producing
    /// call in its template; this can only be checked after
    /// compilation, so validation here covers only what's knowable
    /// from the config alone.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        if let Condition::Schedule { cron } = &self.condition {
            if cron.trim().is_empty() {
                return Err(format!("task {}: schedule condition requires a cron expression", self.name));
            }
        }
        self.buffer_period
            .validate()
            .map_err(|e| format!("task {}: {}", self.name, e))?;
        if self.working_dir.trim().is_empty() {
            return Err(format!("task {}: working_dir must not be empty", self.name));
        }
        Ok(())
    }
}

/// (De)serializes a `Duration` as whole seconds so config files carry
/// a plain integer instead of a nanosecond-precision struct.
mod seconds_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> TaskConfig {
        TaskConfig {
            name: "api-sync".to_string(),
            enabled: true,
            condition: Condition::Dynamic,
            template: "{{ service \"api\" }}".to_string(),
            module: ModuleConfig {
                source: "./modules/api".to_string(),
                variables: Default::default(),
                providers: vec![],
            },
            buffer_period: BufferPeriodConfig::default(),
            working_dir: "/var/run/cts/api-sync".to_string(),
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut task = base_task();
        task.name = "  ".to_string();
        assert!(task.validate().is_err());
    }

    #[test]
    fn schedule_without_cron_is_rejected() {
        let mut task = base_task();
        task.condition = Condition::Schedule { cron: "".to_string() };
        assert!(task.validate().is_err());
    }

    #[test]
    fn buffer_period_min_greater_than_max_is_rejected() {
        let mut task = base_task();
        task.buffer_period = BufferPeriodConfig {
            enabled: true,
            min: std::time::Duration::from_secs(10),
            max: std::time::Duration::from_secs(5),
        };
        assert!(task.validate().is_err());
    }
}
