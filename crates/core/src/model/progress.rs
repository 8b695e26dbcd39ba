use std::collections::BTreeMap;

/// Ordinal → answered flag for every question of an attempt.
///
/// Always derived from the current answers; never edited directly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnsweredQuestions {
    entries: BTreeMap<u32, bool>,
}

impl AnsweredQuestions {
    /// Build the map for `1..=total`, asking `is_answered` about each ordinal.
    #[must_use]
    pub fn derive(total: u32, mut is_answered: impl FnMut(u32) -> bool) -> Self {
        let entries = (1..=total)
            .map(|ordinal| (ordinal, is_answered(ordinal)))
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_answered(&self, ordinal: u32) -> bool {
        self.entries.get(&ordinal).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.entries.values().filter(|answered| **answered).count()
    }

    /// Ordinals still missing an answer, in order. Used for the pre-submit check.
    #[must_use]
    pub fn unanswered(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(_, answered)| !**answered)
            .map(|(ordinal, _)| *ordinal)
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries.values().all(|answered| *answered)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, bool)> + '_ {
        self.entries.iter().map(|(ordinal, answered)| (*ordinal, *answered))
    }
}
