//! Named-stage registry shared by every connection worker.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::stage::stage::Stage;
use crate::stage::SessionId;

/// All stages known to one channel server.
///
/// Stages are created on first reference and never implicitly destroyed
/// at this layer; reaping empty rooms is front-end policy.
pub struct StageRegistry {
    stages: RwLock<HashMap<String, Arc<Stage>>>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-create the well-known lobby stages from configuration.
    pub fn seed<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stages = self.stages.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            let id = id.into();
            stages
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Stage::new(id)));
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Stage>> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Look a stage up, creating it on first reference.
    pub fn get_or_create(&self, id: &str) -> Arc<Stage> {
        if let Some(stage) = self.get(id) {
            return stage;
        }

        let mut stages = self.stages.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            stages
                .entry(id.to_owned())
                .or_insert_with(|| {
                    info!(stage = id, "creating stage");
                    Arc::new(Stage::new(id))
                }),
        )
    }

    /// Remove a session from every stage it is registered in, dropping
    /// any objects owned by `char_id` along the way. Returns the number
    /// of stages the session was evicted from.
    pub fn remove_session(&self, session: SessionId, char_id: u32) -> usize {
        let stages: Vec<Arc<Stage>> = {
            let map = self.stages.read().unwrap_or_else(PoisonError::into_inner);
            map.values().cloned().collect()
        };

        let mut evicted = 0;
        for stage in stages {
            if stage.leave(session) {
                let objects = stage.despawn_objects_owned_by(char_id);
                debug!(
                    stage = stage.id(),
                    session = %session,
                    objects,
                    "evicted session from stage"
                );
                evicted += 1;
            }
        }
        evicted
    }

    /// Find the stage currently holding `char_id`, if any.
    pub fn find_char(&self, char_id: u32) -> Option<Arc<Stage>> {
        let map = self.stages.read().unwrap_or_else(PoisonError::into_inner);
        map.values().find(|s| s.contains_char(char_id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stage_ids(&self) -> Vec<String> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testutil::RecordingSession;

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = StageRegistry::new();
        let a = registry.get_or_create("sl1Ns200p0a0u0");
        let b = registry.get_or_create("sl1Ns200p0a0u0");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn seed_creates_lobbies_once() {
        let registry = StageRegistry::new();
        registry.seed(["town", "guild", "town"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("town").is_some());
    }

    #[test]
    fn remove_session_evicts_everywhere_and_reaps_objects() {
        let registry = StageRegistry::new();
        let town = registry.get_or_create("town");
        let quest = registry.get_or_create("quest");

        let session = RecordingSession::new(1, 500);
        town.join(session.clone(), 500);
        quest.join(session.clone(), 500);
        quest.spawn_object(500, 0.0, 0.0, 0.0);
        quest.spawn_object(999, 0.0, 0.0, 0.0);

        let evicted = registry.remove_session(SessionId(1), 500);
        assert_eq!(evicted, 2);
        assert!(!town.contains_session(SessionId(1)));
        assert!(!quest.contains_session(SessionId(1)));
        assert_eq!(quest.object_count(), 1);
        assert_eq!(registry.remove_session(SessionId(1), 500), 0);
    }

    #[test]
    fn find_char_scans_all_stages() {
        let registry = StageRegistry::new();
        let town = registry.get_or_create("town");
        let session = RecordingSession::new(7, 123);
        town.join(session, 123);

        let found = registry.find_char(123).expect("char is in town");
        assert_eq!(found.id(), "town");
        assert!(registry.find_char(124).is_none());
    }
}
