//! In-process claims for the transcription and synthesis stages.
//!
//! Poll and push can both schedule the same row. A claim held here keeps a
//! second worker from starting the same stage on the same row until the
//! first one finishes. Reply generation additionally claims in the record
//! store, which is the authority across processes.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatch::JobKind;

type Key = (JobKind, String);

/// Set of `(stage, message_id)` pairs currently being worked on.
pub struct InFlight {
    active: Arc<Mutex<HashSet<Key>>>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim a stage for a row. Returns `None` when another worker already
    /// holds it. The claim is released when the guard drops.
    pub fn try_begin(&self, kind: JobKind, message_id: &str) -> Option<InFlightGuard> {
        let key = (kind, message_id.to_owned());
        let mut active = self.active.lock();
        if !active.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            active: self.active.clone(),
            key,
        })
    }

    /// Number of stages currently running.
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}
