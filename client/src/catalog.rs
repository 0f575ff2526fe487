//! Catalog snapshots and the default preset/voice selection policy.

use std::sync::Arc;

use tokio::sync::watch;

use crate::models::EngineInfo;

/// Presets tried, in order, when no remembered selection applies.
pub const PREFERRED_PRESETS: &[&str] = &["assistant", "narrator"];
/// Voices tried, in order, when no remembered selection applies.
pub const PREFERRED_VOICES: &[&str] = &["bella", "af_"];

/// Result of one successful discovery. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub engine: EngineInfo,
    pub presets: Vec<String>,
    pub voices: Vec<String>,
}

impl CatalogSnapshot {
    /// Builds a snapshot, dropping repeated ids while keeping first-seen order.
    pub fn new(engine: EngineInfo, presets: Vec<String>, voices: Vec<String>) -> Self {
        Self {
            engine,
            presets: dedupe(presets),
            voices: dedupe(voices),
        }
    }
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Currently chosen preset and voice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub preset: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub preferred_presets: Vec<String>,
    pub preferred_voices: Vec<String>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            preferred_presets: PREFERRED_PRESETS.iter().map(|s| s.to_string()).collect(),
            preferred_voices: PREFERRED_VOICES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SelectionPolicy {
    /// Picks defaults for a freshly fetched catalog, keeping `remembered`
    /// choices that are still offered.
    pub fn apply(&self, catalog: &CatalogSnapshot, remembered: &Selection) -> Selection {
        Selection {
            preset: select_default(
                &catalog.presets,
                remembered.preset.as_deref(),
                &self.preferred_presets,
            ),
            voice: select_default(
                &catalog.voices,
                remembered.voice.as_deref(),
                &self.preferred_voices,
            ),
        }
    }
}

/// Remembered id if still present, else the first id matching the earliest
/// preferred substring (case-insensitive), else the first id.
pub fn select_default<S: AsRef<str>>(
    catalog: &[String],
    remembered: Option<&str>,
    preferred: &[S],
) -> Option<String> {
    if let Some(remembered) = remembered {
        if catalog.iter().any(|id| id == remembered) {
            return Some(remembered.to_string());
        }
    }

    for needle in preferred {
        let needle = needle.as_ref().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if let Some(id) = catalog.iter().find(|id| id.to_lowercase().contains(&needle)) {
            return Some(id.clone());
        }
    }

    catalog.first().cloned()
}

/// Holder for the latest catalog. Readers always see a whole snapshot; a
/// publish swaps the `Arc` rather than editing in place.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    tx: Arc<watch::Sender<Option<Arc<CatalogSnapshot>>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn publish(&self, snapshot: CatalogSnapshot) -> Arc<CatalogSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Some(Arc::clone(&snapshot)));
        snapshot
    }

    pub fn current(&self) -> Option<Arc<CatalogSnapshot>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<CatalogSnapshot>>> {
        self.tx.subscribe()
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn engine() -> EngineInfo {
        EngineInfo {
            status: "ready".into(),
            engine_version: "1.0".into(),
            api_version: "1".into(),
        }
    }

    #[test]
    fn preferred_substring_wins_over_order() {
        let catalog = ids(&["narrator", "assistant"]);
        assert_eq!(
            select_default(&catalog, None, &["assistant"]),
            Some("assistant".to_string())
        );
    }

    #[test]
    fn empty_catalog_has_no_default() {
        assert_eq!(select_default(&[], Some("narrator"), &["assistant"]), None);
    }

    #[test]
    fn remembered_selection_survives_refresh() {
        let catalog = ids(&["narrator", "assistant"]);
        assert_eq!(
            select_default(&catalog, Some("narrator"), &["assistant"]),
            Some("narrator".to_string())
        );
    }

    #[test]
    fn stale_remembered_falls_through() {
        let catalog = ids(&["calm", "excited"]);
        assert_eq!(
            select_default(&catalog, Some("gone"), &["assistant"]),
            Some("calm".to_string())
        );
    }

    #[test]
    fn matching_is_case_insensitive_and_ordered_by_preference() {
        let catalog = ids(&["am_adam", "AF_Bella", "af_sky"]);
        assert_eq!(
            select_default(&catalog, None, &["bella", "af_"]),
            Some("AF_Bella".to_string())
        );
        assert_eq!(
            select_default(&catalog, None, &["af_"]),
            Some("AF_Bella".to_string())
        );
    }

    #[test]
    fn policy_applies_to_both_lists() {
        let snapshot = CatalogSnapshot::new(
            engine(),
            ids(&["narrator", "assistant"]),
            ids(&["am_adam", "af_bella"]),
        );
        let remembered = Selection {
            preset: Some("narrator".into()),
            voice: Some("missing".into()),
        };
        let chosen = SelectionPolicy::default().apply(&snapshot, &remembered);
        assert_eq!(chosen.preset.as_deref(), Some("narrator"));
        assert_eq!(chosen.voice.as_deref(), Some("af_bella"));
    }

    #[test]
    fn snapshot_drops_duplicates_in_order() {
        let snapshot = CatalogSnapshot::new(engine(), ids(&["b", "a", "b"]), ids(&[]));
        assert_eq!(snapshot.presets, ids(&["b", "a"]));
    }

    #[test]
    fn store_swaps_whole_snapshots() {
        let store = CatalogStore::new();
        assert!(store.current().is_none());

        let first = store.publish(CatalogSnapshot::new(engine(), ids(&["a"]), ids(&["x"])));
        let held = store.current().unwrap();
        store.publish(CatalogSnapshot::new(engine(), ids(&["b", "c"]), ids(&["y"])));

        assert_eq!(held.presets, first.presets);
        assert_eq!(store.current().unwrap().presets, ids(&["b", "c"]));
    }
}
