//! Fuzzy resolution of free-text categorical values (rating agencies, bank
//! names) against a controlled vocabulary.

use std::sync::Arc;

use serde::Serialize;
use strsim::normalized_levenshtein;
use tracing::{debug, warn};

use crate::core::context::RecordContext;

pub const DEFAULT_SIMILARITY_CUTOFF: f64 = 0.8;

/// An immutable list of canonical spellings.
///
/// Entries are trimmed, uppercased, sorted and de-duplicated on construction,
/// so "first best match" is the same for every caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    entries: Vec<String>,
}

impl Vocabulary {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<String> = entries
            .into_iter()
            .map(|e| normalize_key(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_key(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Result of resolving one raw value. Unmatched values keep the raw text as
/// their canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEntity {
    pub raw_text: String,
    pub canonical_text: String,
    pub matched: bool,
}

impl CanonicalEntity {
    fn unmatched(raw: &str) -> Self {
        Self {
            raw_text: raw.to_string(),
            canonical_text: raw.to_string(),
            matched: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityMatcher {
    name: &'static str,
    vocabulary: Arc<Vocabulary>,
    cutoff: f64,
}

impl EntityMatcher {
    pub fn new(name: &'static str, vocabulary: Arc<Vocabulary>, cutoff: f64) -> Self {
        Self {
            name,
            vocabulary,
            cutoff,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Finds the vocabulary entry for `text`: best fuzzy score at or above
    /// the cutoff first, then bidirectional containment.
    pub fn lookup(&self, text: &str) -> Option<&str> {
        let key = normalize_key(text);
        if key.is_empty() {
            return None;
        }

        let mut best: Option<(&str, f64)> = None;
        for entry in self.vocabulary.entries() {
            let score = normalized_levenshtein(&key, entry);
            if score >= self.cutoff && best.is_none_or(|(_, s)| score > s) {
                best = Some((entry, score));
            }
        }
        if let Some((entry, score)) = best {
            debug!(matcher = self.name, input = %key, entry, score, "Fuzzy match");
            return Some(entry);
        }

        self.vocabulary
            .entries()
            .iter()
            .find(|entry| entry.contains(&key) || key.contains(entry.as_str()))
            .map(|entry| {
                debug!(matcher = self.name, input = %key, entry = %entry, "Containment match");
                entry.as_str()
            })
    }

    /// Resolves `raw` against the vocabulary. Never fails; a miss is logged
    /// with the record context and the raw text is kept.
    pub fn resolve(&self, raw: &str, ctx: &RecordContext) -> CanonicalEntity {
        if raw.trim().is_empty() {
            debug!(matcher = self.name, source = %ctx.source, "Empty value, nothing to match");
            return CanonicalEntity::unmatched(raw);
        }

        match self.lookup(raw) {
            Some(entry) => CanonicalEntity {
                raw_text: raw.to_string(),
                canonical_text: entry.to_string(),
                matched: true,
            },
            None => {
                warn!(
                    matcher = self.name,
                    source = %ctx.source,
                    fund = ?ctx.fund,
                    manager = ?ctx.manager,
                    value = raw,
                    "No vocabulary match, keeping original text"
                );
                CanonicalEntity::unmatched(raw)
            }
        }
    }
}
