use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::DeliveryMode;

// The lock is never held across an await.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<String, JobHandle>>>,
}

struct JobHandle {
    cancel: CancellationToken,
    mode: DeliveryMode,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: &str,
        cancel: CancellationToken,
        mode: DeliveryMode,
    ) -> Registration {
        self.entries()
            .insert(id.to_string(), JobHandle { cancel, mode });
        debug!(job_id = %id, "job registered");
        Registration {
            registry: self.clone(),
            id: id.to_string(),
        }
    }

    pub fn cancel(&self, id: &str) -> bool {
        match self.entries().get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let entries = self.entries();
        for handle in entries.values() {
            handle.cancel.cancel();
        }
        entries.len()
    }

    pub fn deregister(&self, id: &str) {
        if self.entries().remove(id).is_some() {
            debug!(job_id = %id, "job deregistered");
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn active_in_mode(&self, mode: DeliveryMode) -> usize {
        self.entries()
            .values()
            .filter(|handle| handle.mode == mode)
            .count()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, JobHandle>> {
        // A panic elsewhere cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Deregisters on drop, including unwinding and task abort.
pub struct Registration {
    registry: TaskRegistry,
    id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
    }
}
