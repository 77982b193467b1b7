//! Retrieval seam and a keyword-overlap implementation.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One retrieved document fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub source: String,
    pub content: String,
    pub score: f32,
}

/// Returns context snippets for a query, most relevant first.
pub trait Retriever: Send + Sync {
    /// `hint` narrows the query, e.g. to a module type.
    fn query(&self, text: &str, top_k: usize, hint: Option<&str>) -> Vec<Snippet>;
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "how", "what", "when", "where", "should",
];

/// Bonus added when the hint names the document.
const HINT_BONUS: f32 = 0.3;

#[derive(Debug, Clone)]
struct Document {
    name: String,
    content: String,
    words: BTreeSet<String>,
}

/// Ranks in-memory documents by the share of query keywords found in their
/// name or content.
#[derive(Debug, Clone)]
pub struct KeywordRetriever {
    docs: Vec<Document>,
}

impl Default for KeywordRetriever {
    fn default() -> Self {
        Self::from_documents(std::iter::empty::<(String, String)>())
    }
}

impl KeywordRetriever {
    pub fn from_documents<I, N, C>(docs: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        let docs = docs
            .into_iter()
            .map(|(name, content)| {
                let name: String = name.into();
                let content: String = content.into();
                let title = name.replace(['_', '-'], " ");
                Document {
                    words: keywords(&format!("{title} {content}")),
                    name,
                    content,
                }
            })
            .collect();
        Self { docs }
    }

    /// Load every `*.md` file directly under `dir`; the file stem is the document name.
    pub fn load_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut docs = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            docs.push((stem.to_string(), std::fs::read_to_string(&path)?));
        }
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::debug!(count = docs.len(), dir = %dir.as_ref().display(), "loaded retrieval documents");
        Ok(Self::from_documents(docs))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl Retriever for KeywordRetriever {
    fn query(&self, text: &str, top_k: usize, hint: Option<&str>) -> Vec<Snippet> {
        let terms = keywords(text);
        if terms.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let hint = hint.map(str::to_lowercase);

        let mut ranked: Vec<Snippet> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let hits = terms.iter().filter(|t| doc.words.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                let mut score = hits as f32 / terms.len() as f32;
                if hint
                    .as_deref()
                    .is_some_and(|h| doc.name.to_lowercase().contains(h))
                {
                    score += HINT_BONUS;
                }
                Some(Snippet {
                    source: doc.name.clone(),
                    content: doc.content.clone(),
                    score,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.source.cmp(&b.source))
        });
        ranked.truncate(top_k);
        ranked
    }
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(str::to_lowercase)
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever() -> KeywordRetriever {
        KeywordRetriever::from_documents([
            ("architecture_guidelines", "Layered firmware architecture with HAL drivers."),
            ("sensor_drivers", "I2C sensor drivers and calibration for firmware."),
            ("power", "Sleep modes and power budgets."),
        ])
    }

    #[test]
    fn test_ranks_by_keyword_overlap() {
        let hits = retriever().query("firmware architecture guidelines", 5, None);
        assert_eq!(hits[0].source, "architecture_guidelines");
        assert!(hits.iter().all(|s| s.source != "power"));
    }

    #[test]
    fn test_top_k_limits_results() {
        assert_eq!(retriever().query("firmware drivers", 1, None).len(), 1);
        assert!(retriever().query("firmware", 0, None).is_empty());
    }

    #[test]
    fn test_hint_boosts_named_document() {
        let hits = retriever().query("firmware", 3, Some("sensor"));
        assert_eq!(hits[0].source, "sensor_drivers");
    }

    #[test]
    fn test_stopwords_only_query_is_empty() {
        assert!(retriever().query("the and for", 5, None).is_empty());
    }

    #[test]
    fn test_load_dir_reads_markdown_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("uart.md"), "UART framing rules").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "UART ignored").unwrap();
        let r = KeywordRetriever::load_dir(dir.path()).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.query("uart", 5, None)[0].source, "uart");
    }
}
