//! Application state for the HTTP server

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::pipeline::Pipeline;
use crate::resolver::Classifier;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub classifier: Arc<dyn Classifier>,
    pub requests: CancelRegistry,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            pipeline,
            classifier,
            requests: CancelRegistry::default(),
            started_at: Utc::now(),
        }
    }
}

/// In-flight requests that a client may cancel by id
#[derive(Clone, Default)]
pub struct CancelRegistry {
    entries: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    next_generation: Arc<AtomicU64>,
}

impl CancelRegistry {
    /// Start tracking a request.
    ///
    /// Returns `None` when `id` already belongs to a running request.
    pub fn register(&self, id: Option<String>) -> Option<RequestGuard> {
        let token = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        if let Some(id) = &id {
            let mut entries = self.lock();
            if entries.contains_key(id) {
                return None;
            }
            entries.insert(id.clone(), (generation, token.clone()));
        }

        Some(RequestGuard {
            registry: self.clone(),
            id,
            generation,
            token: token.clone(),
            _cancel_on_drop: token.drop_guard(),
        })
    }

    /// Cancel a tracked request. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &str, generation: u64) {
        let mut entries = self.lock();
        if entries.get(id).map(|(g, _)| *g) == Some(generation) {
            entries.remove(id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        // A poisoned map is still structurally sound.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ties a request's token to the lifetime of whatever holds the guard.
///
/// Dropping the guard cancels the token and forgets the request id, so a
/// client that disconnects mid-request stops all work started for it.
pub struct RequestGuard {
    registry: CancelRegistry,
    id: Option<String>,
    generation: u64,
    token: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl RequestGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if let Some(id) = &self.id {
            self.registry.remove(id, self.generation);
        }
    }
}
