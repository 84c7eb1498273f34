//! Per-component serialization of instance creation.

use crate::{Result, SimError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

type CreateLock = Arc<tokio::sync::Mutex<()>>;

/// Runs at most one create at a time per component ID.
///
/// A concurrent create for the same ID waits for the one in flight and then
/// runs its own closure, which finds the instance already present. Entries
/// are dropped once no create for that ID is running or waiting.
#[derive(Default)]
pub(crate) struct CreateGate {
    locks: Mutex<HashMap<String, CreateLock>>,
}

impl CreateGate {
    pub(crate) async fn serialize<F, T>(&self, component_id: &str, create: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| SimError::Lock(e.to_string()))?;
            locks.entry(component_id.to_string()).or_default().clone()
        };

        let _guard = lock.lock().await;
        let result = create.await;
        self.release(component_id, &lock);
        result
    }

    fn release(&self, component_id: &str, lock: &CreateLock) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // One reference in the map and one held here: nobody else is waiting.
        if Arc::strong_count(lock) == 2 {
            locks.remove(component_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
