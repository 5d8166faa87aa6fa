use std::f64::consts::PI;

use super::dataset::Dataset;
use super::traits::Classifier;

/// Fraction of the largest feature variance added to every variance.
pub const VAR_SMOOTHING: f64 = 1e-9;

#[derive(Debug, Clone)]
struct ClassStats {
    label: usize,
    log_prior: f64,
    mean: Vec<f64>,
    var: Vec<f64>,
}

/// Gaussian naive Bayes over the classes seen in training.
#[derive(Debug, Clone)]
pub struct NaiveBayes {
    classes: Vec<ClassStats>,
}

/// Per-feature mean and population variance.
fn mean_var<'a, I>(rows: I, n_features: usize) -> (Vec<f64>, Vec<f64>)
where
    I: Iterator<Item = &'a Vec<f64>> + Clone,
{
    let mut mean = vec![0.0; n_features];
    let mut count = 0usize;
    for row in rows.clone() {
        for (m, x) in mean.iter_mut().zip(row) {
            *m += x;
        }
        count += 1;
    }
    if count == 0 {
        return (mean, vec![0.0; n_features]);
    }
    for m in &mut mean {
        *m /= count as f64;
    }
    let mut var = vec![0.0; n_features];
    for row in rows {
        for ((v, x), m) in var.iter_mut().zip(row).zip(&mean) {
            *v += (x - m) * (x - m);
        }
    }
    for v in &mut var {
        *v /= count as f64;
    }
    (mean, var)
}

impl NaiveBayes {
    pub fn fit(data: &Dataset, n_classes: usize) -> Self {
        let n_features = data.n_features();
        let (_, overall) = mean_var(data.features.iter(), n_features);
        let max_var = overall.iter().copied().fold(0.0, f64::max);
        let epsilon = if max_var > 0.0 {
            VAR_SMOOTHING * max_var
        } else {
            VAR_SMOOTHING
        };

        let total = data.len() as f64;
        let classes = (0..n_classes)
            .filter_map(|label| {
                let rows = data
                    .features
                    .iter()
                    .zip(&data.labels)
                    .filter(move |(_, y)| **y == label)
                    .map(|(x, _)| x);
                let count = rows.clone().count();
                if count == 0 {
                    return None;
                }
                let (mean, mut var) = mean_var(rows, n_features);
                for v in &mut var {
                    *v += epsilon;
                }
                Some(ClassStats {
                    label,
                    log_prior: (count as f64 / total).ln(),
                    mean,
                    var,
                })
            })
            .collect();
        Self { classes }
    }

    fn log_likelihood(stats: &ClassStats, features: &[f64]) -> f64 {
        let mut sum = stats.log_prior;
        for ((x, m), v) in features.iter().zip(&stats.mean).zip(&stats.var) {
            sum -= 0.5 * (2.0 * PI * v).ln();
            sum -= (x - m) * (x - m) / (2.0 * v);
        }
        sum
    }
}

impl Classifier for NaiveBayes {
    fn name(&self) -> &str {
        "NaiveBayes"
    }

    fn predict(&self, features: &[f64]) -> usize {
        let mut best: Option<(usize, f64)> = None;
        for stats in &self.classes {
            let score = Self::log_likelihood(stats, features);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((stats.label, score));
            }
        }
        best.map_or(0, |(label, _)| label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_gaussian_clusters() {
        let data = Dataset {
            features: vec![
                vec![1.0, 0.0],
                vec![1.2, 0.1],
                vec![0.8, 0.0],
                vec![0.0, 3.0],
                vec![0.1, 3.2],
                vec![0.0, 2.9],
            ],
            labels: vec![2, 2, 2, 0, 0, 0],
        };
        let nb = NaiveBayes::fit(&data, 3);
        assert_eq!(nb.classes.len(), 2, "unseen label 1 has no class model");
        assert_eq!(nb.predict(&[1.1, 0.1]), 2);
        assert_eq!(nb.predict(&[0.0, 3.1]), 0);
    }

    #[test]
    fn constant_features_do_not_divide_by_zero() {
        let data = Dataset {
            features: vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
            labels: vec![0, 0, 1],
        };
        let nb = NaiveBayes::fit(&data, 2);
        assert_eq!(nb.predict(&[1.0, 0.0]), 0);
        assert_eq!(nb.predict(&[0.0, 1.0]), 1);
    }

    #[test]
    fn empty_model_predicts_first_label() {
        let nb = NaiveBayes::fit(&Dataset::default(), 3);
        assert_eq!(nb.predict(&[]), 0);
    }
}
