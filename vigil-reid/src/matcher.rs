//! Similarity matcher
//!
//! Pure cosine-similarity search of a probe embedding against enrolled gallery
//! embeddings. Input defects (empty or zero-norm probe, dimension mismatch, undecodable
//! stored bytes) never raise: they produce "no match" or skip the candidate.
//!
//! Candidates are visited in ascending profile id order regardless of the order they are
//! passed in; on exactly equal similarity the first visited candidate wins.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Stored embedding decode failures
#[derive(Debug, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding is empty")]
    Empty,

    #[error("embedding byte length {0} is not a multiple of 4")]
    Misaligned(usize),

    #[error("embedding contains a non-finite value at index {0}")]
    NonFinite(usize),
}

/// Encode an embedding as little-endian f32 bytes
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes written by [`encode_embedding`]
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
    if bytes.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if bytes.len() % 4 != 0 {
        return Err(EmbeddingError::Misaligned(bytes.len()));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite(index));
    }

    Ok(values)
}

/// L2 norm, accumulated in f64
pub fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|v| (*v as f64) * (*v as f64))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity of two equal-length vectors
///
/// Returns 0.0 when either vector has zero (or non-finite) norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let denominator = l2_norm(a) * l2_norm(b);
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    (dot / denominator).clamp(-1.0, 1.0) as f32
}

/// One enrolled gallery embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identity_id: String,
    pub profile_id: i64,
    /// Stored bytes; decoded lazily so that one corrupt row cannot fail the search
    pub embedding: Vec<u8>,
}

impl Candidate {
    pub fn new(identity_id: impl Into<String>, profile_id: i64, embedding: &[f32]) -> Self {
        Self {
            identity_id: identity_id.into(),
            profile_id,
            embedding: encode_embedding(embedding),
        }
    }
}

/// Outcome of a gallery search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<i64>,
    /// Best similarity found (0.0 when nothing was comparable)
    pub similarity: f32,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            is_match: false,
            identity_id: None,
            profile_id: None,
            similarity,
        }
    }
}

/// Cosine-similarity gallery matcher
#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    default_threshold: f32,
}

impl SimilarityMatcher {
    /// `default_threshold` is used when a search passes no explicit threshold
    pub fn new(default_threshold: f32) -> Self {
        Self { default_threshold }
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    /// Find the best candidate for `probe`
    ///
    /// `is_match` is true only when the best similarity reaches the threshold
    /// (`threshold` if given, otherwise the default).
    pub fn match_probe(
        &self,
        probe: &[f32],
        candidates: &[Candidate],
        threshold: Option<f32>,
    ) -> MatchResult {
        let threshold = threshold.unwrap_or(self.default_threshold);

        let probe_norm = l2_norm(probe);
        if probe.is_empty() || probe_norm == 0.0 || !probe_norm.is_finite() {
            debug!(dimensions = probe.len(), "Rejecting empty or zero-norm probe");
            return MatchResult::no_match(0.0);
        }

        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.profile_id);

        let mut best: Option<(&Candidate, f32)> = None;

        for candidate in ordered {
            let stored = match decode_embedding(&candidate.embedding) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(
                        profile_id = candidate.profile_id,
                        identity_id = %candidate.identity_id,
                        error = %e,
                        "Skipping gallery profile with undecodable embedding"
                    );
                    continue;
                }
            };

            if stored.len() != probe.len() {
                debug!(
                    profile_id = candidate.profile_id,
                    expected = probe.len(),
                    actual = stored.len(),
                    "Skipping gallery profile with mismatched dimensions"
                );
                continue;
            }

            let similarity = cosine_similarity(probe, &stored);
            let better = match best {
                Some((_, best_similarity)) => similarity > best_similarity,
                None => true,
            };
            if better {
                best = Some((candidate, similarity));
            }
        }

        match best {
            Some((candidate, similarity)) if similarity >= threshold => MatchResult {
                is_match: true,
                identity_id: Some(candidate.identity_id.clone()),
                profile_id: Some(candidate.profile_id),
                similarity,
            },
            Some((_, similarity)) => MatchResult::no_match(similarity),
            None => MatchResult::no_match(0.0),
        }
    }
}
