//! Phase 4 — retrieval (§4.1 detail): hybrid-scored rule candidates.
//! `final_score = w_vec * cos(query, rule_emb) + w_bm25 * bm25(query,
//! rule.condition_text)`, ties broken by (higher priority → higher
//! final_score → lower rule id) deterministically.

use std::collections::HashMap;

use loom_domain::config::RetrievalConfig;
use loom_domain::rule::Rule;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScoredRule {
    pub rule: Rule,
    pub final_score: f64,
}

/// Scores and ranks `candidates` against `query_embedding`/`query_text`,
/// truncated to `config.max_candidates`. BM25 is computed over the
/// candidate set itself as the corpus — there is no separate document
/// store for rule condition text.
pub fn retrieve_candidates(candidates: Vec<Rule>, query_embedding: Option<&[f32]>, query_text: &str, config: &RetrievalConfig) -> Vec<ScoredRule> {
    let corpus: Vec<&str> = candidates.iter().map(|r| r.condition_text.as_str()).collect();
    let bm25 = Bm25::new(&corpus);
    let query_terms = tokenize(query_text);

    let mut scored: Vec<ScoredRule> = candidates
        .into_iter()
        .enumerate()
        .map(|(idx, rule)| {
            let cos = match (query_embedding, &rule.embedding) {
                (Some(q), Some(e)) => cosine(q, e),
                _ => 0.0,
            };
            let bm25_score = bm25.score(idx, &query_terms);
            let final_score = config.w_vec * cos as f64 + config.w_bm25 * bm25_score;
            ScoredRule { rule, final_score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.rule
            .priority
            .cmp(&a.rule.priority)
            .then(b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.rule.id.cmp(&b.rule.id))
    });
    scored.truncate(config.max_candidates);
    scored
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase().split_whitespace().map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string()).filter(|s| !s.is_empty()).collect()
}

/// Minimal Okapi BM25 over a fixed, small document set (the retrieval
/// candidate pool) — no persistent inverted index, computed fresh per
/// query since the corpus is already bounded by `max_candidates`.
struct Bm25 {
    docs: Vec<Vec<String>>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f64,
}

impl Bm25 {
    const K1: f64 = 1.2;
    const B: f64 = 0.75;

    fn new(corpus: &[&str]) -> Self {
        let docs: Vec<Vec<String>> = corpus.iter().map(|d| tokenize(d)).collect();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            let unique: std::collections::HashSet<&String> = doc.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let avg_doc_len = if docs.is_empty() { 0.0 } else { docs.iter().map(|d| d.len()).sum::<usize>() as f64 / docs.len() as f64 };
        Self { docs, doc_freq, avg_doc_len }
    }

    fn score(&self, doc_idx: usize, query_terms: &[String]) -> f64 {
        let doc = &self.docs[doc_idx];
        if doc.is_empty() || self.avg_doc_len == 0.0 {
            return 0.0;
        }
        let n = self.docs.len() as f64;
        let doc_len = doc.len() as f64;
        let mut score = 0.0;
        for term in query_terms {
            let tf = doc.iter().filter(|t| *t == term).count() as f64;
            if tf == 0.0 {
                continue;
            }
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let numer = tf * (Self::K1 + 1.0);
            let denom = tf + Self::K1 * (1.0 - Self::B + Self::B * doc_len / self.avg_doc_len);
            score += idf * numer / denom;
        }
        score
    }
}

/// Used by Phase 5's LLM relevance judge to cap how many candidates are
/// sent for a second-pass judgment.
pub fn top_n(scored: Vec<ScoredRule>, n: usize) -> Vec<ScoredRule> {
    scored.into_iter().take(n).collect()
}

pub fn rule_ids(scored: &[ScoredRule]) -> Vec<Uuid> {
    scored.iter().map(|s| s.rule.id).collect()
}
