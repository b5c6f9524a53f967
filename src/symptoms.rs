// src/symptoms.rs
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("failed to read symptom vocabulary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("symptom vocabulary {0} is empty")]
    Empty(String),
}

/// The canonical ordered list of recognized symptom names. The order defines
/// feature-vector indices and must match the order the model was trained
/// with, so the vocabulary is loaded once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct SymptomVocabulary {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl SymptomVocabulary {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    /// Load from a one-name-per-line file.
    pub fn load(path: &Path) -> Result<Self, VocabularyError> {
        let raw = fs::read_to_string(path).map_err(|source| VocabularyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let names: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(VocabularyError::Empty(path.display().to_string()));
        }
        Ok(Self::new(names))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names the vocabulary does not recognize, in request order. The HTTP
    /// layer rejects a request listing any of these before vectorization.
    pub fn unknown<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|name| !self.contains(name))
            .map(|name| name.as_str())
            .collect()
    }

    /// One-hot feature vector over the vocabulary. Unrecognized names are
    /// silently ignored here; callers validate with `unknown` first.
    pub fn vectorize(&self, selected: &[String]) -> Vec<f32> {
        let mut features = vec![0.0; self.names.len()];
        for name in selected {
            if let Some(&i) = self.index.get(name.as_str()) {
                features[i] = 1.0;
            }
        }
        features
    }

    /// Case-insensitive substring search, capped at `limit` results.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&str> {
        let needle = query.to_lowercase();
        self.names
            .iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .take(limit)
            .map(|name| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> SymptomVocabulary {
        SymptomVocabulary::new(vec![
            "fever".to_string(),
            "cough".to_string(),
            "fatigue".to_string(),
            "headache".to_string(),
            "sore_throat".to_string(),
        ])
    }

    #[test]
    fn vectorize_marks_selected_indices() {
        let vocab = vocab();
        let selected = vec!["fever".to_string(), "fatigue".to_string()];
        let features = vocab.vectorize(&selected);

        assert_eq!(features.len(), vocab.len());
        assert_eq!(features.iter().filter(|&&f| f == 1.0).count(), 2);
        assert_eq!(features[0], 1.0);
        assert_eq!(features[1], 0.0);
        assert_eq!(features[2], 1.0);
    }

    #[test]
    fn vectorize_ignores_unrecognized_names() {
        let vocab = vocab();
        let selected = vec!["fever".to_string(), "levitation".to_string()];
        let features = vocab.vectorize(&selected);
        assert_eq!(features.iter().filter(|&&f| f == 1.0).count(), 1);
    }

    #[test]
    fn unknown_enumerates_offenders_in_order() {
        let vocab = vocab();
        let requested = vec![
            "levitation".to_string(),
            "cough".to_string(),
            "glowing".to_string(),
        ];
        assert_eq!(vocab.unknown(&requested), vec!["levitation", "glowing"]);
    }

    #[test]
    fn full_vocabulary_selection_is_all_ones() {
        let vocab = vocab();
        let all: Vec<String> = vocab.names.clone();
        let features = vocab.vectorize(&all);
        assert!(features.iter().all(|&f| f == 1.0));
    }

    #[test]
    fn search_is_case_insensitive_and_capped() {
        let vocab = vocab();
        assert_eq!(vocab.search("FeV", 10), vec!["fever"]);
        assert_eq!(vocab.search("o", 2).len(), 2);
        assert!(vocab.search("", 3).len() <= 3);
    }
}
