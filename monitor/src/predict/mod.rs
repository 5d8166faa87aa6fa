pub mod bayes;
pub mod dataset;
pub mod knn;
pub mod traits;
pub mod tree;
pub mod vocabulary;

use std::collections::BTreeMap;
use std::time::Instant;

use lms_common::config::PredictConfig;
use tracing::info;

use self::bayes::NaiveBayes;
use self::dataset::{Dataset, DatasetError};
use self::knn::Knn;
use self::traits::{accuracy, Classifier};
use self::tree::{DecisionTree, RandomForest};
use self::vocabulary::Vocabulary;

#[derive(Debug, Clone, Copy)]
pub struct TrainingOptions {
    pub forest_trees: usize,
    pub knn_neighbors: usize,
    pub seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            forest_trees: 100,
            knn_neighbors: 5,
            seed: 42,
        }
    }
}

impl From<&PredictConfig> for TrainingOptions {
    fn from(config: &PredictConfig) -> Self {
        Self {
            forest_trees: config.forest_trees,
            knn_neighbors: config.knn_neighbors,
            seed: config.seed,
        }
    }
}

pub struct Predictor {
    vocab: Vocabulary,
    models: Vec<Box<dyn Classifier>>,
}

impl Predictor {
    /// Fit all four models on `training`.
    pub fn train(vocab: Vocabulary, training: &Dataset, options: TrainingOptions) -> Self {
        let n_classes = vocab.diseases().len();
        let models: Vec<Box<dyn Classifier>> = vec![
            Box::new(DecisionTree::fit(training, n_classes)),
            Box::new(RandomForest::fit(
                training,
                n_classes,
                options.forest_trees,
                options.seed,
            )),
            Box::new(Knn::fit(training, n_classes, options.knn_neighbors)),
            Box::new(NaiveBayes::fit(training, n_classes)),
        ];
        Self { vocab, models }
    }

    /// Load both CSVs named in the config, train, and log how each model
    /// scores on the held-out set.
    pub fn load(config: &PredictConfig) -> Result<Self, DatasetError> {
        let vocab = Vocabulary::default();
        let training = Dataset::load(&config.training_csv, &vocab)?;
        let testing = Dataset::load(&config.testing_csv, &vocab)?;

        let started = Instant::now();
        let predictor = Self::train(vocab, &training, TrainingOptions::from(config));
        info!(
            rows = training.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "disease models trained"
        );

        for (model, score) in predictor.evaluate(&testing) {
            info!(model = %model, accuracy = score, rows = testing.len(), "test accuracy");
        }
        Ok(predictor)
    }

    /// Accuracy of every model on `data`, keyed by model name.
    pub fn evaluate(&self, data: &Dataset) -> BTreeMap<String, f64> {
        self.models
            .iter()
            .map(|m| (m.name().to_string(), accuracy(m.as_ref(), &data.features, &data.labels)))
            .collect()
    }

    /// Each model's disease for the given symptom names. Unknown names are
    /// ignored.
    pub fn predict<S: AsRef<str>>(&self, symptoms: &[S]) -> BTreeMap<String, String> {
        let features = self.vocab.encode(symptoms);
        self.models
            .iter()
            .map(|m| {
                let label = m.predict(&features);
                let disease = self.vocab.disease(label).unwrap_or("unknown");
                (m.name().to_string(), disease.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMPTOMS: &[&str] = &["fever", "coughing", "lameness", "swelling", "drooling"];
    const DISEASES: &[&str] = &["bloat", "foot_rot", "calf_pneumonia"];

    fn training() -> Dataset {
        let mut data = Dataset::default();
        for _ in 0..6 {
            data.features.push(vec![0.0, 0.0, 0.0, 1.0, 1.0]);
            data.labels.push(0);
            data.features.push(vec![0.0, 0.0, 1.0, 1.0, 0.0]);
            data.labels.push(1);
            data.features.push(vec![1.0, 1.0, 0.0, 0.0, 0.0]);
            data.labels.push(2);
        }
        data
    }

    fn predictor() -> Predictor {
        let options = TrainingOptions {
            forest_trees: 20,
            ..TrainingOptions::default()
        };
        Predictor::train(Vocabulary::new(SYMPTOMS, DISEASES), &training(), options)
    }

    #[test]
    fn every_model_reports_under_its_name() {
        let result = predictor().predict(&["fever", "coughing"]);
        let names: Vec<&str> = result.keys().map(String::as_str).collect();
        assert_eq!(names, ["DecisionTree", "KNN", "NaiveBayes", "RandomForest"]);
        for disease in result.values() {
            assert_eq!(disease, "calf_pneumonia");
        }
    }

    #[test]
    fn unknown_symptoms_are_ignored() {
        let p = predictor();
        let with_noise = p.predict(&["lameness", "swelling", "purple_spots", "lameness"]);
        let clean = p.predict(&["lameness", "swelling"]);
        assert_eq!(with_noise, clean);
        assert_eq!(clean["KNN"], "foot_rot");
        assert_eq!(clean["DecisionTree"], "foot_rot");
    }

    #[test]
    fn training_set_is_learned() {
        let data = training();
        let scores = predictor().evaluate(&data);
        assert_eq!(scores.len(), 4);
        for (model, score) in scores {
            assert_eq!(score, 1.0, "{model} misclassified training rows");
        }
    }

    #[test]
    fn load_fails_on_missing_csv() {
        let config = PredictConfig {
            training_csv: "/nonexistent/Training.csv".into(),
            ..PredictConfig::default()
        };
        assert!(matches!(Predictor::load(&config), Err(DatasetError::Read(..))));
    }
}
