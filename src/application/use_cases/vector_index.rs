/// In-memory exact inner-product index over L2-normalized vectors, so scores
/// are cosine similarities.
#[derive(Debug, Default)]
pub struct FlatIpIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Position of the vector in insertion order.
    pub position: usize,
    pub score: f32,
}

impl FlatIpIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Normalizes and stores the vector. Returns false on a dimension mismatch.
    pub fn add(&mut self, mut vector: Vec<f32>) -> bool {
        if vector.len() != self.dimension {
            return false;
        }
        normalize_l2(&mut vector);
        self.vectors.push(vector);
        true
    }

    /// Best `top_k` matches, highest score first. `top_k` larger than the
    /// index is clamped.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<SearchHit> {
        if query.len() != self.dimension || top_k == 0 {
            return vec![];
        }

        let mut query = query.to_vec();
        normalize_l2(&mut query);

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| SearchHit {
                position,
                score: dot(&query, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(top_k.min(self.vectors.len()));
        hits
    }
}

pub fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_l2() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_l2(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_search_ranks_by_cosine() {
        let mut index = FlatIpIndex::new(2);
        assert!(index.add(vec![10.0, 0.0]));
        assert!(index.add(vec![0.0, 1.0]));
        assert!(index.add(vec![1.0, 1.0]));

        let hits = index.search(&[0.0, 5.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_search_clamps_top_k() {
        let mut index = FlatIpIndex::new(3);
        index.add(vec![1.0, 0.0, 0.0]);
        index.add(vec![0.0, 1.0, 0.0]);
        assert_eq!(index.search(&[1.0, 1.0, 1.0], 50).len(), 2);
        assert!(index.search(&[1.0, 1.0, 1.0], 0).is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = FlatIpIndex::new(2);
        assert!(!index.add(vec![1.0]));
        assert!(index.is_empty());
        index.add(vec![1.0, 0.0]);
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_empty());
    }
}
