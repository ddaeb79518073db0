//! Wake-phrase matching over recognition transcripts.
//!
//! Matching is plain containment (or prefix) on normalized text. There is no
//! word-boundary or confidence check, so "hey minions" also matches
//! "hey minion".

use crate::config::MatchMode;

/// Lowercase, turn punctuation into spaces and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Configured wake phrases, pre-normalized.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrases: Vec<(String, String)>,
    mode: MatchMode,
}

impl PhraseMatcher {
    pub fn new<I, S>(phrases: I, mode: MatchMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = Vec::<(String, String)>::new();
        for phrase in phrases {
            let original = phrase.as_ref().trim().to_string();
            let normalized = normalize(&original);
            if normalized.is_empty() || seen.iter().any(|(_, n)| *n == normalized) {
                continue;
            }
            seen.push((original, normalized));
        }
        Self {
            phrases: seen,
            mode,
        }
    }

    /// First configured phrase found in `transcript`.
    pub fn find(&self, transcript: &str) -> Option<&str> {
        let text = normalize(transcript);
        if text.is_empty() {
            return None;
        }
        self.phrases
            .iter()
            .find(|(_, phrase)| match self.mode {
                MatchMode::Contains => text.contains(phrase.as_str()),
                MatchMode::Prefix => text.starts_with(phrase.as_str()),
            })
            .map(|(original, _)| original.as_str())
    }

    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().map(|(original, _)| original.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
