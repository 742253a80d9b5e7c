use crate::errors::{AgentError, AgentResult};

/// Exact nearest-neighbour index over squared euclidean distance.
///
/// Brute force: documents handled by the agent are a few hundred chunks at most.
#[derive(Debug, Clone, Default)]
pub struct FlatL2Index {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    /// Build an index whose dimension is taken from the first vector
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> AgentResult<Self> {
        let dimension = vectors.first().map_or(0, Vec::len);
        let mut index = Self::new(dimension);
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    /// Add a vector; its id is its insertion position
    pub fn add(&mut self, vector: Vec<f32>) -> AgentResult<usize> {
        self.check_dimension(&vector)?;
        self.vectors.push(vector);
        Ok(self.vectors.len() - 1)
    }

    /// Up to `k` nearest vectors as (id, squared distance), closest first
    pub fn search(&self, query: &[f32], k: usize) -> AgentResult<Vec<(usize, f32)>> {
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;

        let mut scores: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vector)| (id, squared_l2(query, vector)))
            .collect();

        // stable, so equal distances keep insertion order
        scores.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);

        Ok(scores)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn check_dimension(&self, vector: &[f32]) -> AgentResult<()> {
        if vector.len() != self.dimension {
            return Err(AgentError::Internal(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
