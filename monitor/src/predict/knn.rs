use super::dataset::Dataset;
use super::traits::{majority, Classifier};

/// k-nearest neighbours, Euclidean distance, unweighted vote.
#[derive(Debug, Clone)]
pub struct Knn {
    k: usize,
    n_classes: usize,
    features: Vec<Vec<f64>>,
    labels: Vec<usize>,
}

impl Knn {
    pub fn fit(data: &Dataset, n_classes: usize, k: usize) -> Self {
        Self {
            k: k.max(1),
            n_classes,
            features: data.features.clone(),
            labels: data.labels.clone(),
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl Classifier for Knn {
    fn name(&self) -> &str {
        "KNN"
    }

    fn predict(&self, features: &[f64]) -> usize {
        // Equal distances keep training order, so earlier rows win.
        let mut neighbours: Vec<(f64, usize)> = self
            .features
            .iter()
            .zip(&self.labels)
            .map(|(row, &label)| (squared_distance(row, features), label))
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut votes = vec![0usize; self.n_classes];
        for &(_, label) in neighbours.iter().take(self.k) {
            votes[label] += 1;
        }
        majority(&votes)
    }
}
