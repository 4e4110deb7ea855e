//! Process-wide registry of live bridges (spec.md §4.8), grounded in this
//! codebase's `state.rs` session map. A plain mutex is sufficient per
//! spec.md §5 ("SessionRegistry: plain mutex; all operations are O(1)").
//! Holds non-owning `Arc` handles — a Bridge's lifetime is governed by its
//! own task, not by the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

/// The subset of Bridge behavior the registry needs to expose to the admin
/// console's `terminate` command.
pub trait Terminable: Send + Sync {
    /// Publishes the terminating admin's name and cancels the bridge.
    /// Idempotent: a second call from a different admin does not race the
    /// first, since the name is published via a single atomic swap.
    fn terminate(&self, admin: &str);
}

pub struct SessionRegistry<B: Terminable> {
    sessions: Mutex<HashMap<Uuid, Arc<B>>>,
}

impl<B: Terminable> Default for SessionRegistry<B> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<B: Terminable> SessionRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: Uuid, bridge: Arc<B>) {
        self.sessions.lock().await.insert(id, bridge);
    }

    pub async fn remove(&self, id: Uuid) {
        self.sessions.lock().await.remove(&id);
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<B>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn list_ids(&self) -> Vec<Uuid> {
        self.sessions.lock().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Terminates every live session, for graceful shutdown (spec.md §6).
    pub async fn terminate_all(&self, admin: &str) {
        for bridge in self.sessions.lock().await.values() {
            bridge.terminate(admin);
        }
    }

    /// Resolves `id` and terminates it on the caller's behalf; returns
    /// `false` if no such session exists (already disconnected).
    pub async fn terminate(&self, id: Uuid, admin: &str) -> bool {
        match self.get(id).await {
            Some(bridge) => {
                bridge.terminate(admin);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeBridge(AtomicBool);

    impl Terminable for FakeBridge {
        fn terminate(&self, _admin: &str) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn terminate_resolves_and_cancels() {
        let registry = SessionRegistry::<FakeBridge>::new();
        let id = Uuid::new_v4();
        let bridge = Arc::new(FakeBridge(AtomicBool::new(false)));
        registry.add(id, bridge.clone()).await;

        assert!(registry.terminate(id, "admin").await);
        assert!(bridge.0.load(Ordering::SeqCst));
        assert!(!registry.terminate(Uuid::new_v4(), "admin").await);
    }
}
