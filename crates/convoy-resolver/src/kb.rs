//! Keyword-ranked fallback knowledge base.
//!
//! Scores every document against the query tokens:
//! `2·title_hits + body_hits + 1.5·tag_hits`, takes the top-k, and
//! synthesizes an answer from their titles and leading snippets. The
//! confidence of a fallback answer never exceeds 0.7.

use std::sync::Arc;

use tracing::debug;

use convoy_core::KnowledgeDoc;
use convoy_storage::KnowledgeStore;

use crate::backend::Completion;
use crate::error::ResolverResult;

const SNIPPET_CHARS: usize = 160;
const MAX_FALLBACK_CONFIDENCE: f64 = 0.7;

/// The in-process fallback resolver.
pub struct KeywordKb {
    store: Arc<dyn KnowledgeStore>,
    top_k: usize,
}

impl KeywordKb {
    /// Build over a knowledge store, answering from the `top_k` best
    /// documents.
    #[must_use]
    pub fn new(store: Arc<dyn KnowledgeStore>, top_k: usize) -> Self {
        Self {
            store,
            top_k: top_k.max(1),
        }
    }

    /// Rank documents and synthesize an answer.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; an empty store yields a low-confidence
    /// "no match" answer rather than an error.
    pub async fn answer(&self, query: &str) -> ResolverResult<Completion> {
        let tokens = tokenize(query);
        let docs = self.store.all_docs().await?;

        let mut scored: Vec<(f64, &KnowledgeDoc)> = docs
            .iter()
            .map(|doc| (score(doc, &tokens), doc))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);

        if scored.is_empty() {
            debug!(query, "Fallback KB found no matching documents");
            return Ok(Completion {
                content: "I couldn't find anything on that. Let me get you to a person."
                    .to_string(),
                confidence: 0.0,
            });
        }

        let best_score = scored[0].0;
        let mut content = String::from("Here's what I found:\n");
        for (_, doc) in &scored {
            content.push_str("\n- ");
            content.push_str(&doc.title);
            content.push_str(": ");
            content.push_str(&snippet(&doc.body));
        }

        Ok(Completion {
            content,
            confidence: confidence_for(best_score),
        })
    }
}

/// Lowercased tokens split on whitespace and punctuation.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `2·title_hits + body_hits + 1.5·tag_hits` over the query tokens.
fn score(doc: &KnowledgeDoc, tokens: &[String]) -> f64 {
    let title_tokens = tokenize(&doc.title);
    let body_tokens = tokenize(&doc.body);

    let mut total = 0.0;
    for token in tokens {
        let title_hits = title_tokens.iter().filter(|t| *t == token).count();
        let body_hits = body_tokens.iter().filter(|t| *t == token).count();
        let tag_hits = doc
            .tags
            .iter()
            .filter(|tag| tag.to_lowercase() == *token)
            .count();

        #[allow(clippy::cast_precision_loss)]
        {
            total += 2.0 * title_hits as f64 + body_hits as f64 + 1.5 * tag_hits as f64;
        }
    }
    total
}

/// Map a raw score onto `(0, 0.7)`, saturating for strong matches.
fn confidence_for(best_score: f64) -> f64 {
    MAX_FALLBACK_CONFIDENCE * (best_score / (best_score + 3.0))
}

fn snippet(body: &str) -> String {
    let mut out: String = body.chars().take(SNIPPET_CHARS).collect();
    if body.chars().count() > SNIPPET_CHARS {
        out.push('…');
    }
    out
}
