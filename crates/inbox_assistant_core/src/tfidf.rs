//! crates/inbox_assistant_core/src/tfidf.rs
//!
//! A deterministic, dependency-free embedding used when no remote embedding
//! provider answers. Vectors are corpus-relative: every text in one `embed`
//! call shares the same vocabulary, so the whole comparison batch must be
//! embedded together.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ports::{EmbeddingService, PortResult};
use crate::text::tokenize;

/// Bag-of-words TF-IDF vectorizer with L2-normalized output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TfIdfEmbedder;

impl TfIdfEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Computes one vector per document over the batch's sorted vocabulary.
    pub fn vectorize(docs: &[String]) -> Vec<Vec<f32>> {
        let token_lists: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();

        // Document frequency, keyed in sorted order so vector positions are stable.
        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &token_lists {
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let n = docs.len() as f32;
        let idf: Vec<(&str, f32)> = df
            .iter()
            .map(|(term, count)| (*term, (1.0 + n / (1.0 + *count as f32)).ln()))
            .collect();

        token_lists
            .iter()
            .map(|tokens| {
                let mut tf: HashMap<&str, f32> = HashMap::new();
                for t in tokens {
                    *tf.entry(t.as_str()).or_insert(0.0) += 1.0;
                }
                let vec: Vec<f32> = idf
                    .iter()
                    .map(|(term, weight)| tf.get(term).copied().unwrap_or(0.0) * weight)
                    .collect();
                l2_normalize(vec)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingService for TfIdfEmbedder {
    fn name(&self) -> &str {
        "tfidf"
    }

    async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        Ok(Self::vectorize(texts))
    }
}

fn l2_normalize(vec: Vec<f32>) -> Vec<f32> {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec;
    }
    vec.into_iter().map(|v| v / norm).collect()
}

/// Normalized dot product of two vectors.
///
/// The shorter vector is implicitly zero-padded; a zero-norm side yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().max(b.len());
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0.0);
        let y = b.get(i).copied().unwrap_or(0.0);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
