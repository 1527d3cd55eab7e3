use std::{fs, path::PathBuf};

use anyhow::Context;

use crate::types::{CheckpointState, CrawlerError};

/// Durable snapshot of crawl state, one overwritten JSON file per crawl
/// name. The storage medium is deliberately hidden behind save/load so
/// it can be swapped without touching engine logic.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        CheckpointStore { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn save(&self, state: &CheckpointState) -> Result<(), CrawlerError> {
        let write = || -> anyhow::Result<()> {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir)?;
            }
            let raw = serde_json::to_vec_pretty(state)?;
            fs::write(&self.path, raw)
                .with_context(|| format!("could not write checkpoint {:?}", self.path))?;
            Ok(())
        };
        write().map_err(|e| CrawlerError::Checkpoint(format!("{:#}", e)))
    }

    /// Best-effort: a missing or corrupt checkpoint means "start fresh",
    /// never a fatal error.
    pub fn load(&self) -> Option<CheckpointState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!("no checkpoint at {:?}, starting fresh", self.path);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("corrupt checkpoint at {:?} ({}), starting fresh", self.path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Component, CrawlProgress};
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};

    fn sample_state() -> CheckpointState {
        let component = Component::new("Button".into(), Some("inputs".into()), None);
        CheckpointState {
            visited: HashSet::from(["https://x.test/docs/button".to_string()]),
            queued: vec!["https://x.test/docs/card".into()],
            components: HashMap::from([(component.id.clone(), component)]),
            errors: vec![],
            progress: CrawlProgress::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("ui-checkpoint.json"));
        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.visited, state.visited);
        assert_eq!(loaded.queued, state.queued);
        assert_eq!(loaded.components, state.components);
    }

    #[test]
    fn save_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("ui-checkpoint.json"));
        let mut state = sample_state();
        store.save(&state).unwrap();
        state.visited.insert("https://x.test/docs/card".into());
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.visited.len(), 2);
    }

    #[test]
    fn missing_checkpoint_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("none.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let store = CheckpointStore::new(path);
        assert!(store.load().is_none());
    }
}
