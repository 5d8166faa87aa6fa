/// A fitted model mapping a feature vector to a label index.
pub trait Classifier: Send + Sync {
    /// Key under which predictions are reported.
    fn name(&self) -> &str;

    fn predict(&self, features: &[f64]) -> usize;
}

/// Index of the largest count. Ties go to the lowest index.
pub(crate) fn majority(counts: &[usize]) -> usize {
    let mut best = 0;
    for (label, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = label;
        }
    }
    best
}

/// Share of `labels` that `model` gets right.
pub fn accuracy(model: &dyn Classifier, features: &[Vec<f64>], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = features
        .iter()
        .zip(labels)
        .filter(|(x, y)| model.predict(x) == **y)
        .count();
    correct as f64 / labels.len() as f64
}
