//! Bounded, per-task ring of execution history.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::error::{Classified, ErrorKind};

use super::model::Event;

const DEFAULT_RETENTION: usize = 5;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event task name must not be empty")]
    InvalidArgument,
}

impl Classified for EventStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::InvalidArgument => ErrorKind::Configuration,
        }
    }
}

/// Per-task ring buffer, newest event first, capped at `retention`.
pub struct EventStore {
    retention: usize,
    tasks: parking_lot::RwLock<HashMap<String, VecDeque<Event>>>,
}

impl EventStore {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            tasks: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn append(&self, event: Event) -> Result<(), EventStoreError> {
        if event.task_name.trim().is_empty() {
            return Err(EventStoreError::InvalidArgument);
        }
        let mut tasks = self.tasks.write();
        let ring = tasks.entry(event.task_name.clone()).or_default();
        ring.push_front(event);
        while ring.len() > self.retention {
            ring.pop_back();
        }
        Ok(())
    }

    /// Newest-first snapshot for one task.
    pub fn read(&self, task_name: &str) -> Vec<Event> {
        self.tasks
            .read()
            .get(task_name)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Newest-first snapshot for every task with recorded history.
    pub fn read_all(&self) -> HashMap<String, Vec<Event>> {
        self.tasks
            .read()
            .iter()
            .map(|(name, ring)| (name.clone(), ring.iter().cloned().collect()))
            .collect()
    }

    pub fn delete(&self, task_name: &str) {
        self.tasks.write().remove(task_name);
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn append_rejects_empty_task_name() {
        let store = EventStore::default();
        let event = Event::success("", SystemTime::now(), SystemTime::now());
        assert!(matches!(
            store.append(event),
            Err(EventStoreError::InvalidArgument)
        ));
    }

    #[test]
    fn ring_discards_oldest_beyond_retention() {
        let store = EventStore::new(2);
        for _ in 0..5 {
            store
                .append(Event::success("t", SystemTime::now(), SystemTime::now()))
                .unwrap();
        }
        assert_eq!(store.read("t").len(), 2);
    }

    #[test]
    fn read_returns_newest_first() {
        let store = EventStore::new(5);
        let first = Event::success("t", SystemTime::now(), SystemTime::now());
        let first_id = first.id;
        store.append(first).unwrap();
        let second = Event::success("t", SystemTime::now(), SystemTime::now());
        let second_id = second.id;
        store.append(second).unwrap();
        let events = store.read("t");
        assert_eq!(events[0].id, second_id);
        assert_eq!(events[1].id, first_id);
    }

    #[test]
    fn delete_clears_task_history() {
        let store = EventStore::default();
        store
            .append(Event::success("t", SystemTime::now(), SystemTime::now()))
            .unwrap();
        store.delete("t");
        assert!(store.read("t").is_empty());
    }
}
