use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::dataset::Dataset;
use super::traits::{majority, Classifier};

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        label: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

/// Grows one tree. `max_features` caps how many non-constant features are
/// examined per split; with an rng they are visited in shuffled order.
struct Grower<'a> {
    data: &'a Dataset,
    n_classes: usize,
    max_features: usize,
    rng: Option<&'a mut StdRng>,
}

impl Grower<'_> {
    fn counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &i in samples {
            counts[self.data.labels[i]] += 1;
        }
        counts
    }

    fn grow(mut self, samples: Vec<usize>) -> Vec<Node> {
        let mut nodes = vec![Node::Leaf { label: 0 }];
        let mut work = vec![(0usize, samples)];

        while let Some((id, samples)) = work.pop() {
            let counts = self.counts(&samples);
            let label = majority(&counts);
            let classes_present = counts.iter().filter(|&&c| c > 0).count();
            if classes_present <= 1 || samples.len() < 2 {
                nodes[id] = Node::Leaf { label };
                continue;
            }

            let Some(split) = self.best_split(&samples, &counts) else {
                nodes[id] = Node::Leaf { label };
                continue;
            };

            let (left, right): (Vec<usize>, Vec<usize>) = samples
                .into_iter()
                .partition(|&i| self.data.features[i][split.feature] <= split.threshold);

            let left_id = nodes.len();
            nodes.push(Node::Leaf { label });
            let right_id = nodes.len();
            nodes.push(Node::Leaf { label });
            nodes[id] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_id,
                right: right_id,
            };
            work.push((left_id, left));
            work.push((right_id, right));
        }
        nodes
    }

    fn best_split(&mut self, samples: &[usize], counts: &[usize]) -> Option<Split> {
        let n_features = self.data.n_features();
        let mut order: Vec<usize> = (0..n_features).collect();
        if let Some(rng) = self.rng.as_deref_mut() {
            order.shuffle(rng);
        }

        let total = samples.len();
        let mut best: Option<Split> = None;
        let mut examined = 0;
        let mut column: Vec<(f64, usize)> = Vec::with_capacity(total);

        for feature in order {
            column.clear();
            column.extend(
                samples
                    .iter()
                    .map(|&i| (self.data.features[i][feature], self.data.labels[i])),
            );
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if column[0].0 == column[total - 1].0 {
                continue;
            }

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for k in 0..total - 1 {
                let (value, label) = column[k];
                left[label] += 1;
                right[label] -= 1;
                let next = column[k + 1].0;
                if value == next {
                    continue;
                }
                let n_left = k + 1;
                let n_right = total - n_left;
                let impurity = (n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right))
                    / total as f64;
                if best.map_or(true, |b| impurity < b.impurity - 1e-12) {
                    best = Some(Split {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        impurity,
                    });
                }
            }

            examined += 1;
            if examined >= self.max_features {
                break;
            }
        }
        best
    }
}

/// Unpruned CART tree; splits until leaves are pure or inseparable.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn fit(data: &Dataset, n_classes: usize) -> Self {
        let samples = (0..data.len()).collect();
        Self::fit_samples(data, n_classes, samples, data.n_features(), None)
    }

    fn fit_samples(
        data: &Dataset,
        n_classes: usize,
        samples: Vec<usize>,
        max_features: usize,
        rng: Option<&mut StdRng>,
    ) -> Self {
        let grower = Grower {
            data,
            n_classes,
            max_features: max_features.max(1),
            rng,
        };
        Self {
            nodes: grower.grow(samples),
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Node::Split { left, right, .. } = self.nodes[id] {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        deepest
    }
}

impl Classifier for DecisionTree {
    fn name(&self) -> &str {
        "DecisionTree"
    }

    fn predict(&self, features: &[f64]) -> usize {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { label } => return label,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(feature).copied().unwrap_or(0.0);
                    id = if value <= threshold { left } else { right };
                }
            }
        }
    }
}

/// Bootstrap-aggregated trees, √features per split, majority vote.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_classes: usize,
}

impl RandomForest {
    /// Tree `i` draws from its own rng seeded with `seed + i`, so a given
    /// seed always grows the same forest.
    pub fn fit(data: &Dataset, n_classes: usize, n_trees: usize, seed: u64) -> Self {
        let n = data.len();
        let max_features = (data.n_features() as f64).sqrt() as usize;
        let trees = (0..n_trees as u64)
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i));
                let samples = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit_samples(data, n_classes, samples, max_features, Some(&mut rng))
            })
            .collect();
        Self { trees, n_classes }
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &str {
        "RandomForest"
    }

    fn predict(&self, features: &[f64]) -> usize {
        let mut votes = vec![0usize; self.n_classes];
        for tree in &self.trees {
            votes[tree.predict(features)] += 1;
        }
        majority(&votes)
    }
}
