// src/classifier.rs
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("model initialization failed: {0}")]
    Init(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output shape: {0}")]
    Shape(String),
}

/// The pretrained disease classifier. Takes a one-hot symptom feature vector
/// and returns the class-probability distribution.
pub trait DiseaseModel: Send + Sync {
    fn predict(&self, features: &[f32]) -> Result<Vec<f32>, ModelError>;
}

/// ONNX Runtime session over the exported network.
///
/// Uses interior mutability (Mutex) because `Session::run` requires
/// `&mut self` while the trait exposes `&self` for shared use from request
/// handlers.
pub struct OnnxDiseaseModel {
    session: Mutex<Session>,
}

impl OnnxDiseaseModel {
    /// Load the exported model from disk, failing fast if it is absent.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.display().to_string()));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ModelError::Init(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e: ort::Error| ModelError::Init(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e: ort::Error| ModelError::Init(format!("ONNX load failed: {e}")))?;

        tracing::info!("disease model loaded from {}", path.display());

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl DiseaseModel for OnnxDiseaseModel {
    fn predict(&self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
        use ort::value::TensorRef;

        let width = features.len();
        let input = ndarray::Array2::from_shape_vec((1, width), features.to_vec())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let tensor = TensorRef::from_array_view(&input)
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Inference(format!("ONNX inference failed: {e}")))?;

        // Output shape: [1, num_classes]
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("output extraction: {e}")))?;
        if shape.len() != 2 || shape[0] != 1 {
            return Err(ModelError::Shape(format!("{shape:?}")));
        }

        Ok(data.to_vec())
    }
}

/// Index and probability of the highest-probability class. `None` only for
/// an empty distribution; ties resolve to the lowest index.
pub fn top_prediction(distribution: &[f32]) -> Option<(usize, f32)> {
    distribution
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read disease mapping {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed disease mapping line {0}")]
    Malformed(usize),
    #[error("disease mapping is empty")]
    Empty,
}

/// Maps the model's encoded class index back to a disease name, loaded from
/// the `Disease,Encoded` mapping file shipped alongside the model.
#[derive(Debug, Clone)]
pub struct DiseaseMapping {
    by_class: HashMap<usize, String>,
}

impl DiseaseMapping {
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let raw = fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, MappingError> {
        let mut by_class = HashMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if lineno == 0 && line.to_lowercase().starts_with("disease") {
                continue;
            }
            // Disease name first, encoded class last; names may contain commas.
            let (disease, encoded) = line
                .rsplit_once(',')
                .ok_or(MappingError::Malformed(lineno + 1))?;
            let class: usize = encoded
                .trim()
                .parse()
                .map_err(|_| MappingError::Malformed(lineno + 1))?;
            by_class.insert(class, disease.trim().to_string());
        }
        if by_class.is_empty() {
            return Err(MappingError::Empty);
        }
        Ok(Self { by_class })
    }

    pub fn disease_for(&self, class: usize) -> Option<&str> {
        self.by_class.get(&class).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_prediction_picks_argmax() {
        let dist = vec![0.1, 0.05, 0.7, 0.15];
        assert_eq!(top_prediction(&dist), Some((2, 0.7)));
    }

    #[test]
    fn top_prediction_tie_resolves_to_first() {
        let dist = vec![0.4, 0.4, 0.2];
        assert_eq!(top_prediction(&dist), Some((0, 0.4)));
    }

    #[test]
    fn top_prediction_empty_is_none() {
        assert_eq!(top_prediction(&[]), None);
    }

    #[test]
    fn mapping_parses_with_header() {
        let mapping = DiseaseMapping::parse("Disease,Encoded\nMalaria,0\nDengue,1\n").unwrap();
        assert_eq!(mapping.disease_for(0), Some("Malaria"));
        assert_eq!(mapping.disease_for(1), Some("Dengue"));
        assert_eq!(mapping.disease_for(2), None);
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn mapping_keeps_commas_inside_names() {
        let mapping = DiseaseMapping::parse("Disease,Encoded\n\"Hepatitis, viral\",3\n").unwrap();
        assert_eq!(mapping.disease_for(3), Some("\"Hepatitis, viral\""));
    }

    #[test]
    fn mapping_rejects_garbage_lines() {
        assert!(matches!(
            DiseaseMapping::parse("Disease,Encoded\nMalaria,zero\n"),
            Err(MappingError::Malformed(2))
        ));
        assert!(matches!(
            DiseaseMapping::parse("Disease,Encoded\n"),
            Err(MappingError::Empty)
        ));
    }
}
