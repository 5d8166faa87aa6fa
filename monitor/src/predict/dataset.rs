use std::path::Path;

use super::vocabulary::Vocabulary;

/// Name of the label column.
pub const LABEL_COLUMN: &str = "prognosis";

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("dataset is empty")]
    Empty,
    #[error("missing column `{0}`")]
    MissingColumn(String),
    #[error("line {line}: expected at least {expected} cells, got {got}")]
    ShortRow {
        line: usize,
        expected: usize,
        got: usize,
    },
    #[error("line {line}: column `{column}` is not numeric: {value:?}")]
    NotNumeric {
        line: usize,
        column: String,
        value: String,
    },
    #[error("line {line}: unknown disease label {label:?}")]
    UnknownLabel { line: usize, label: String },
}

/// Feature matrix and labels, columns in vocabulary order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
}

impl Dataset {
    pub fn load(path: &Path, vocab: &Vocabulary) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DatasetError::Read(path.display().to_string(), e))?;
        Self::parse(&content, vocab)
    }

    /// Parse comma-separated text with a header row. Feature columns are
    /// looked up by symptom name, so file column order does not matter and
    /// extra columns are ignored.
    pub fn parse(content: &str, vocab: &Vocabulary) -> Result<Self, DatasetError> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (_, header) = lines.next().ok_or(DatasetError::Empty)?;
        let header: Vec<&str> = split_row(header);
        let column = |name: &str| {
            header
                .iter()
                .position(|h| *h == name)
                .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
        };

        let feature_cols = vocab
            .symptoms()
            .iter()
            .map(|&s| column(s))
            .collect::<Result<Vec<_>, _>>()?;
        let label_col = column(LABEL_COLUMN)?;
        let width = feature_cols
            .iter()
            .copied()
            .chain([label_col])
            .max()
            .map_or(0, |m| m + 1);

        let mut dataset = Dataset::default();
        for (line, row) in lines {
            let cells = split_row(row);
            if cells.len() < width {
                return Err(DatasetError::ShortRow {
                    line,
                    expected: width,
                    got: cells.len(),
                });
            }

            let mut features = Vec::with_capacity(feature_cols.len());
            for (&col, name) in feature_cols.iter().zip(vocab.symptoms()) {
                let value = cells[col].parse::<f64>().map_err(|_| DatasetError::NotNumeric {
                    line,
                    column: name.to_string(),
                    value: cells[col].to_string(),
                })?;
                features.push(value);
            }

            let label = cells[label_col];
            let label = vocab
                .disease_index(label)
                .ok_or_else(|| DatasetError::UnknownLabel {
                    line,
                    label: label.to_string(),
                })?;

            dataset.features.push(features);
            dataset.labels.push(label);
        }

        if dataset.is_empty() {
            return Err(DatasetError::Empty);
        }
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }
}

fn split_row(row: &str) -> Vec<&str> {
    row.split(',').map(|c| c.trim().trim_matches('"')).collect()
}
