use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use exam_core::model::{AnswerPayload, Question, QuestionId, QuestionKind};

use crate::error::SessionError;
use crate::gateway::SavedAnswer;
use crate::sync::lock;

/// Local copy of one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAnswer {
    pub payload: AnswerPayload,
    /// Edited locally and not yet confirmed by the server.
    pub dirty: bool,
    pub saved_at: Option<DateTime<Utc>>,
    /// Bumped on every local edit.
    pub revision: u64,
}

/// Snapshot of a dirty answer, taken right before it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSave {
    pub question_id: QuestionId,
    pub payload: AnswerPayload,
    pub revision: u64,
}

/// How a save confirmation was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAck {
    /// The saved revision is the latest edit; the answer is clean.
    Clean,
    /// A newer edit arrived while saving; the answer stays dirty.
    Superseded,
    /// An equal or newer revision was already confirmed; ignored.
    Stale,
    /// The question is not in the cache.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    answer: CachedAnswer,
    acked_revision: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<QuestionId, Entry>,
    sealed: bool,
}

/// Question id → current answer, with dirty tracking.
///
/// Values update immediately on edit; the dirty flag clears only when the
/// server confirms the newest revision.
#[derive(Debug, Default)]
pub struct AnswerCache {
    state: Mutex<CacheState>,
}

fn empty_payload(kind: QuestionKind) -> AnswerPayload {
    if kind.is_choice() {
        AnswerPayload::choice([])
    } else {
        AnswerPayload::text("")
    }
}

impl AnswerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a visited question, seeding it from the server copy.
    ///
    /// A local entry is kept as is, so re-visiting never discards an edit.
    pub fn visit(&self, question: &Question, saved: Option<&SavedAnswer>) {
        let mut state = lock(&self.state);
        state.entries.entry(question.id()).or_insert_with(|| Entry {
            answer: CachedAnswer {
                payload: saved
                    .map(|saved| saved.payload.clone())
                    .unwrap_or_else(|| empty_payload(question.kind())),
                dirty: false,
                saved_at: saved.map(|saved| saved.saved_at),
                revision: 0,
            },
            acked_revision: 0,
        });
    }

    #[must_use]
    pub fn get(&self, question_id: QuestionId) -> Option<CachedAnswer> {
        lock(&self.state)
            .entries
            .get(&question_id)
            .map(|entry| entry.answer.clone())
    }

    /// Store a new local value and mark it dirty. Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Locked` once the cache is sealed.
    pub fn set(&self, question_id: QuestionId, payload: AnswerPayload) -> Result<u64, SessionError> {
        let mut state = lock(&self.state);
        if state.sealed {
            return Err(SessionError::Locked);
        }
        let entry = state.entries.entry(question_id).or_insert_with(|| Entry {
            answer: CachedAnswer {
                payload: payload.clone(),
                dirty: false,
                saved_at: None,
                revision: 0,
            },
            acked_revision: 0,
        });
        entry.answer.payload = payload;
        entry.answer.dirty = true;
        entry.answer.revision += 1;
        Ok(entry.answer.revision)
    }

    /// The value to send for a dirty answer, or `None` when clean or sealed.
    #[must_use]
    pub fn pending(&self, question_id: QuestionId) -> Option<PendingSave> {
        let state = lock(&self.state);
        if state.sealed {
            return None;
        }
        let entry = state.entries.get(&question_id)?;
        entry.answer.dirty.then(|| PendingSave {
            question_id,
            payload: entry.answer.payload.clone(),
            revision: entry.answer.revision,
        })
    }

    /// Apply a confirmed save of `revision`.
    ///
    /// Confirmations that arrive out of order never roll back a newer one.
    pub fn mark_saved(
        &self,
        question_id: QuestionId,
        revision: u64,
        saved_at: DateTime<Utc>,
    ) -> SaveAck {
        let mut state = lock(&self.state);
        let Some(entry) = state.entries.get_mut(&question_id) else {
            return SaveAck::Unknown;
        };
        if revision <= entry.acked_revision {
            return SaveAck::Stale;
        }
        entry.acked_revision = revision;
        entry.answer.saved_at = Some(saved_at);
        if revision == entry.answer.revision {
            entry.answer.dirty = false;
            SaveAck::Clean
        } else {
            SaveAck::Superseded
        }
    }

    #[must_use]
    pub fn is_dirty(&self, question_id: QuestionId) -> bool {
        lock(&self.state)
            .entries
            .get(&question_id)
            .is_some_and(|entry| entry.answer.dirty)
    }

    /// Dirty questions in id order.
    #[must_use]
    pub fn dirty_questions(&self) -> Vec<QuestionId> {
        let state = lock(&self.state);
        let mut dirty: Vec<QuestionId> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.answer.dirty)
            .map(|(id, _)| *id)
            .collect();
        dirty.sort();
        dirty
    }

    /// Non-empty payload, saved or not.
    #[must_use]
    pub fn is_answered(&self, question_id: QuestionId) -> bool {
        lock(&self.state)
            .entries
            .get(&question_id)
            .is_some_and(|entry| !entry.answer.payload.is_empty())
    }

    /// Refuse further edits and saves. Used once the attempt is finalized.
    pub fn seal(&self) {
        lock(&self.state).sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        lock(&self.state).sealed
    }

    /// Forget everything, for a new attempt.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.sealed = false;
    }

    /// Drop confirmed answers but keep unsaved edits, for re-activating the
    /// same attempt. Returns how many dirty answers were kept.
    pub fn retain_dirty(&self) -> usize {
        let mut state = lock(&self.state);
        state.entries.retain(|_, entry| entry.answer.dirty);
        state.sealed = false;
        state.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{OptionId, QuestionDraft, QuestionOption};
    use exam_core::time::fixed_now;

    fn question() -> Question {
        QuestionDraft {
            id: 1,
            ordinal: 1,
            kind: Some(QuestionKind::SingleChoice),
            text: "Q".into(),
            options: Some(
                (1..=6)
                    .map(|id| QuestionOption {
                        id: OptionId::new(id),
                        text: String::new(),
                    })
                    .collect(),
            ),
            max_score: 1.0,
        }
        .validate()
        .unwrap()
    }

    fn pick(option: u64) -> AnswerPayload {
        AnswerPayload::choice([OptionId::new(option)])
    }

    #[test]
    fn set_then_save_clears_dirty() {
        let cache = AnswerCache::new();
        let q = QuestionId::new(1);
        cache.visit(&question(), None);
        assert_eq!(cache.get(q).unwrap().payload, AnswerPayload::choice([]));
        assert!(!cache.is_answered(q));

        let revision = cache.set(q, pick(5)).unwrap();
        assert!(cache.is_dirty(q));
        let pending = cache.pending(q).unwrap();
        assert_eq!(pending.revision, revision);

        assert_eq!(cache.mark_saved(q, revision, fixed_now()), SaveAck::Clean);
        let answer = cache.get(q).unwrap();
        assert_eq!(answer.payload, pick(5));
        assert!(!answer.dirty);
        assert_eq!(answer.saved_at, Some(fixed_now()));
        assert!(cache.pending(q).is_none());
    }

    #[test]
    fn out_of_order_confirmations_never_clean_a_newer_edit() {
        let cache = AnswerCache::new();
        let q = QuestionId::new(1);
        let first = cache.set(q, pick(1)).unwrap();
        let second = cache.set(q, pick(2)).unwrap();

        // the newer save completes first
        assert_eq!(cache.mark_saved(q, second, fixed_now()), SaveAck::Clean);
        // the older one arrives late and is discarded
        assert_eq!(cache.mark_saved(q, first, fixed_now()), SaveAck::Stale);
        assert!(!cache.is_dirty(q));
        assert_eq!(cache.get(q).unwrap().payload, pick(2));
    }

    #[test]
    fn edit_during_save_keeps_answer_dirty() {
        let cache = AnswerCache::new();
        let q = QuestionId::new(1);
        let sent = cache.set(q, pick(1)).unwrap();
        cache.set(q, pick(3)).unwrap();

        assert_eq!(cache.mark_saved(q, sent, fixed_now()), SaveAck::Superseded);
        assert!(cache.is_dirty(q));
        assert_eq!(cache.pending(q).unwrap().payload, pick(3));
    }

    #[test]
    fn revisit_keeps_local_edit_over_server_copy() {
        let cache = AnswerCache::new();
        let q = question();
        cache.set(q.id(), pick(4)).unwrap();
        let server = SavedAnswer {
            payload: pick(1),
            saved_at: fixed_now(),
        };
        cache.visit(&q, Some(&server));
        assert_eq!(cache.get(q.id()).unwrap().payload, pick(4));
    }

    #[test]
    fn sealed_cache_rejects_edits() {
        let cache = AnswerCache::new();
        let q = QuestionId::new(1);
        cache.set(q, pick(1)).unwrap();
        cache.seal();
        assert!(matches!(cache.set(q, pick(2)), Err(SessionError::Locked)));
        assert!(cache.pending(q).is_none());
        assert_eq!(cache.dirty_questions(), vec![q]);

        cache.reset();
        assert!(!cache.is_sealed());
        assert!(cache.get(q).is_none());
    }

    #[test]
    fn retain_dirty_keeps_only_unsaved_edits() {
        let cache = AnswerCache::new();
        let saved = QuestionId::new(1);
        let unsaved = QuestionId::new(2);
        let revision = cache.set(saved, pick(1)).unwrap();
        cache.mark_saved(saved, revision, fixed_now());
        cache.set(unsaved, pick(2)).unwrap();

        assert_eq!(cache.retain_dirty(), 1);
        assert!(cache.get(saved).is_none());
        assert_eq!(cache.pending(unsaved).unwrap().payload, pick(2));
        assert_eq!(cache.dirty_questions(), vec![unsaved]);
    }
}
