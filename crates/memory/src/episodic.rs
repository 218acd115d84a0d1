//! Episodic index — best-effort keyword → memory-section map used by the
//! context assembler to pick relevant long-term snippets.

use std::collections::{HashMap, HashSet};

/// Words shorter than this carry no signal for matching.
const MIN_KEYWORD_LEN: usize = 4;

pub struct EpisodicIndex {
    /// keyword → section indices.
    keywords: HashMap<String, HashSet<usize>>,
    sections: Vec<(String, String)>,
}

impl EpisodicIndex {
    /// Build from `(category, body)` sections of the memory document.
    pub fn build(sections: Vec<(String, String)>) -> Self {
        let mut keywords: HashMap<String, HashSet<usize>> = HashMap::new();
        for (idx, (name, body)) in sections.iter().enumerate() {
            for word in tokenize(name).chain(tokenize(body)) {
                keywords.entry(word).or_default().insert(idx);
            }
        }
        Self { keywords, sections }
    }

    /// Sections relevant to `text`, most keyword overlap first.
    pub fn relevant(&self, text: &str, limit: usize) -> Vec<(String, String)> {
        let mut scores: HashMap<usize, usize> = HashMap::new();
        for word in tokenize(text) {
            if let Some(indices) = self.keywords.get(&word) {
                for &idx in indices {
                    *scores.entry(idx).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(usize, usize)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(idx, _)| self.sections[idx].clone())
            .collect()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(|w| w.to_lowercase())
}
