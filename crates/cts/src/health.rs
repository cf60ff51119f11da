//! Task and system health as surfaced to the control API.

use serde::{Deserialize, Serialize};

use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Undetermined,
}

impl HealthState {
    /// Derives state from the most recent event: no events yet is
    /// undetermined, a successful last event is healthy, otherwise
    /// degraded.
    pub fn from_last_event(event: Option<&Event>) -> Self {
        match event {
            None => HealthState::Undetermined,
            Some(e) if e.success => HealthState::Healthy,
            Some(_) => HealthState::Degraded,
        }
    }

    /// Worst-of ordering used by `OverallStatus`: degraded beats
    /// healthy, undetermined beats degraded.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: String,
    pub enabled: bool,
    pub last_event: Option<Event>,
    pub health: HealthState,
    pub providers: Vec<String>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Ok,
    UnhealthySystem,
}

impl OverallStatus {
    pub fn from_task_statuses(statuses: &[TaskStatus]) -> Self {
        let worst = statuses
            .iter()
            .map(|s| s.health)
            .fold(HealthState::Healthy, HealthState::worst);
        match worst {
            HealthState::Healthy => OverallStatus::Ok,
            HealthState::Degraded | HealthState::Undetermined => OverallStatus::UnhealthySystem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_degraded_over_healthy() {
        assert_eq!(
            HealthState::Healthy.worst(HealthState::Degraded),
            HealthState::Degraded
        );
    }

    #[test]
    fn overall_status_is_ok_only_when_every_task_is_healthy() {
        let statuses = vec![
            TaskStatus {
                name: "a".into(),
                enabled: true,
                last_event: None,
                health: HealthState::Healthy,
                providers: vec![],
                services: vec![],
            },
            TaskStatus {
                name: "b".into(),
                enabled: true,
                last_event: None,
                health: HealthState::Degraded,
                providers: vec![],
                services: vec![],
            },
        ];
        assert_eq!(
            OverallStatus::from_task_statuses(&statuses),
            OverallStatus::UnhealthySystem
        );
    }
}
