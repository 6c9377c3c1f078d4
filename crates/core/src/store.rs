//! Draft Store and Transcript Log
//!
//! Shared state written by the control-channel dispatcher and read by any
//! number of observers. Every write replaces the whole snapshot inside a
//! `watch` channel, so a reader always sees either the state before or the
//! state after a merge. The draft and active variant are persisted after
//! every write; the transcript lives only in memory.

use crate::draft::{Completion, Draft, compute_completion};
use crate::storage::{DraftStorage, StoreError};
use crate::transcript::{Speaker, TranscriptEntry};
use crate::variant::Variant;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Storage entry holding the serialized draft.
pub const DRAFT_STORAGE_KEY: &str = "mentorcall-draft";

/// An immutable view of the store at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftSnapshot {
    pub draft: Arc<Draft>,
    pub transcript: Arc<Vec<TranscriptEntry>>,
    pub variant: Option<Variant>,
}

#[derive(Serialize, Deserialize)]
struct PersistedDraft {
    variant: Option<Variant>,
    draft: Draft,
}

pub struct DraftStore {
    state: watch::Sender<DraftSnapshot>,
    storage: Arc<dyn DraftStorage>,
    // Serialises snapshot replacement with the durable write that follows it.
    write_lock: Mutex<()>,
}

impl DraftStore {
    /// Opens the store, restoring any draft previously persisted in `storage`.
    ///
    /// An unreadable or corrupt entry is logged and treated as empty.
    pub fn open(storage: Arc<dyn DraftStorage>) -> Self {
        let initial = match storage.load(DRAFT_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedDraft>(&raw) {
                Ok(persisted) => {
                    debug!(
                        fields = persisted.draft.len(),
                        variant = ?persisted.variant,
                        "Restored persisted draft"
                    );
                    DraftSnapshot {
                        draft: Arc::new(persisted.draft),
                        transcript: Arc::default(),
                        variant: persisted.variant,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Persisted draft is corrupt, starting empty");
                    DraftSnapshot::default()
                }
            },
            Ok(None) => DraftSnapshot::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted draft, starting empty");
                DraftSnapshot::default()
            }
        };

        let (state, _) = watch::channel(initial);
        Self {
            state,
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Subscribes to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<DraftSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> DraftSnapshot {
        self.state.borrow().clone()
    }

    pub fn draft(&self) -> Arc<Draft> {
        self.state.borrow().draft.clone()
    }

    pub fn transcript(&self) -> Arc<Vec<TranscriptEntry>> {
        self.state.borrow().transcript.clone()
    }

    pub fn variant(&self) -> Option<Variant> {
        self.state.borrow().variant
    }

    /// Shallow-merges `partial` into the draft.
    ///
    /// Only the keys present in `partial` are overwritten. The in-memory
    /// draft is updated even when the durable write fails; the error is
    /// returned so the caller can report it.
    pub fn merge_fields(&self, partial: Draft) -> Result<Vec<String>, StoreError> {
        let updated: Vec<String> = partial.keys().cloned().collect();
        let _guard = self.lock_writes();
        self.state.send_modify(|snapshot| {
            let mut draft = (*snapshot.draft).clone();
            draft.extend(partial);
            snapshot.draft = Arc::new(draft);
        });
        debug!(?updated, "Merged draft fields");
        self.persist()?;
        Ok(updated)
    }

    /// Sets the variant the draft is being filled for.
    pub fn set_variant(&self, variant: Variant) -> Result<(), StoreError> {
        let _guard = self.lock_writes();
        self.state.send_modify(|snapshot| snapshot.variant = Some(variant));
        self.persist()
    }

    /// Appends a transcript entry. Empty or whitespace-only text is ignored.
    pub fn append_transcript(&self, speaker: Speaker, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let entry = TranscriptEntry::new(speaker, text);
        self.state.send_modify(|snapshot| {
            let mut transcript = (*snapshot.transcript).clone();
            transcript.push(entry);
            snapshot.transcript = Arc::new(transcript);
        });
        true
    }

    /// Empties the draft, the transcript and the active variant, and removes
    /// the durable entry.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock_writes();
        self.state.send_replace(DraftSnapshot::default());
        self.storage.remove(DRAFT_STORAGE_KEY)
    }

    /// Completion of the current draft against `variant`.
    pub fn completion(&self, variant: Variant) -> Completion {
        compute_completion(&self.state.borrow().draft, variant)
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let serialized = {
            let snapshot = self.state.borrow();
            serde_json::to_string(&PersistedDraft {
                variant: snapshot.variant,
                draft: (*snapshot.draft).clone(),
            })?
        };
        self.storage.save(DRAFT_STORAGE_KEY, &serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use serde_json::{Value, json};

    fn partial(value: Value) -> Draft {
        value.as_object().cloned().unwrap()
    }

    fn memory_store() -> DraftStore {
        DraftStore::open(Arc::new(MemoryStorage::new()))
    }

    /// Storage whose writes always fail.
    struct FailingStorage;

    impl DraftStorage for FailingStorage {
        fn load(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        fn save(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_disjoint_merges_commute() {
        let a = partial(json!({"category": "요리", "title": "파스타"}));
        let b = partial(json!({"days": ["토"], "budget": 20000}));

        let first = memory_store();
        first.merge_fields(a.clone()).unwrap();
        first.merge_fields(b.clone()).unwrap();

        let second = memory_store();
        second.merge_fields(b).unwrap();
        second.merge_fields(a).unwrap();

        assert_eq!(first.draft(), second.draft());
        assert_eq!(first.draft().len(), 4);
    }

    #[test]
    fn test_overlapping_key_last_write_wins() {
        let store = memory_store();
        store.merge_fields(partial(json!({"x": "a", "keep": 1}))).unwrap();
        let updated = store.merge_fields(partial(json!({"x": "b"}))).unwrap();

        assert_eq!(updated, vec!["x"]);
        assert_eq!(store.draft()["x"], "b");
        assert_eq!(store.draft()["keep"], 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let storage = Arc::new(MemoryStorage::new());
        let store = DraftStore::open(storage.clone());
        store.set_variant(Variant::SeekMentee).unwrap();
        store.merge_fields(partial(json!({"title": "t"}))).unwrap();
        store.append_transcript(Speaker::Human, "안녕하세요");

        store.clear().unwrap();

        let snapshot = store.snapshot();
        assert!(snapshot.draft.is_empty());
        assert!(snapshot.transcript.is_empty());
        assert_eq!(snapshot.variant, None);
        assert_eq!(storage.load(DRAFT_STORAGE_KEY).unwrap(), None);

        // Clearing an already empty store is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_transcript_ignores_blank_text_and_keeps_order() {
        let store = memory_store();
        assert!(store.append_transcript(Speaker::Human, " 첫 번째 "));
        assert!(!store.append_transcript(Speaker::Agent, "   \n"));
        assert!(store.append_transcript(Speaker::Agent, "두 번째"));

        let transcript = store.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].speaker, Speaker::Human);
        assert_eq!(transcript[0].text, "첫 번째");
        assert_eq!(transcript[1].speaker, Speaker::Agent);
    }

    #[test]
    fn test_draft_survives_reopen_but_transcript_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn DraftStorage> = Arc::new(FileStorage::new(dir.path()));

        let store = DraftStore::open(storage.clone());
        store.set_variant(Variant::SeekMentor).unwrap();
        store.merge_fields(partial(json!({"category": "식물"}))).unwrap();
        store.append_transcript(Speaker::Agent, "어떤 분야인가요?");
        drop(store);

        let reopened = DraftStore::open(storage);
        assert_eq!(reopened.draft()["category"], "식물");
        assert_eq!(reopened.variant(), Some(Variant::SeekMentor));
        assert!(reopened.transcript().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_merged_fields_in_memory() {
        let store = DraftStore::open(Arc::new(FailingStorage));
        let mut rx = store.subscribe();

        let err = store
            .merge_fields(partial(json!({"category": "요리", "title": "파스타"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.draft()["category"], "요리");
        assert_eq!(store.draft()["title"], "파스타");
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_corrupt_entry_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.save(DRAFT_STORAGE_KEY, "not json").unwrap();
        let store = DraftStore::open(storage);
        assert!(store.draft().is_empty());
    }

    #[test]
    fn test_completion_after_single_merge() {
        let store = memory_store();
        store.merge_fields(partial(json!({"category": "식물"}))).unwrap();
        let completion = store.completion(Variant::SeekMentor);
        assert_eq!(completion.filled, vec!["category"]);
        assert_eq!(completion.total, 10);
        assert_eq!(completion.missing.len(), 9);
    }

    #[tokio::test]
    async fn test_subscribers_see_whole_snapshots() {
        let store = memory_store();
        let mut rx = store.subscribe();
        store
            .merge_fields(partial(json!({"title": "t", "content": "c"})))
            .unwrap();
        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.draft.len(), 2);
    }
}
