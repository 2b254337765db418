//! Text embeddings for context retrieval.

/// Turns text into a fixed-size vector
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashed bag of words, L2-normalized.
///
/// Deterministic across processes and builds, so stored embeddings stay
/// comparable with fresh query embeddings.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 256;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

/// 64-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimensions as u64) as usize;
            // High bit picks the sign so collisions tend to cancel out
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

/// Cosine similarity; 0.0 when either side is empty or zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let e = HashingEmbedder::default();
        let a = e.embed("Habit tracker for students");
        let b = e.embed("Habit tracker for students");
        assert_eq!(a, b);
        assert_eq!(a.len(), HashingEmbedder::DEFAULT_DIMENSIONS);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_text_scores_higher() {
        let e = HashingEmbedder::default();
        let query = e.embed("postgres database schema");
        let related = e.embed("The database schema lives in postgres");
        let unrelated = e.embed("Marketing copy for the landing page");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_embeds_to_zero() {
        let e = HashingEmbedder::new(8);
        assert!(e.embed("").iter().all(|v| *v == 0.0));
        assert_eq!(cosine_similarity(&e.embed(""), &e.embed("hello world")), 0.0);
    }
}
