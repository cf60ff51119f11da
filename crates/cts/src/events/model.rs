//! The record of one task execution attempt.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub task_name: String,
    pub start: SystemTime,
    pub end: SystemTime,
    pub success: bool,
    pub error: Option<String>,
}

impl Event {
    pub fn success(task_name: impl Into<String>, start: SystemTime, end: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            start,
            end,
            success: true,
            error: None,
        }
    }

    pub fn failure(
        task_name: impl Into<String>,
        start: SystemTime,
        end: SystemTime,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            start,
            end,
            success: false,
            error: Some(error.into()),
        }
    }
}
