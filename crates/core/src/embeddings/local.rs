use super::EmbeddingProvider;
use crate::error::IngestError;

pub const DEFAULT_LOCAL_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const CHARACTER_NGRAM_MODEL: &str = "char-ngram";
pub const DEFAULT_LOCAL_DIMENSION: usize = 384;

/// In-process embedding model.
///
/// Model ids are loaded as ONNX sentence-embedding models through the
/// `fastembed` feature (on by default), all-MiniLM-L6-v2 unless configured
/// otherwise. `char-ngram` selects a dependency-free trigram hasher with no
/// semantic quality, meant for tests and dry runs.
pub struct LocalModelProvider {
    model_name: String,
    dimension: usize,
    model: LocalModel,
}

enum LocalModel {
    CharacterNgram,
    #[cfg(feature = "fastembed")]
    FastEmbed(std::sync::Mutex<fastembed::TextEmbedding>),
}

impl LocalModelProvider {
    pub fn character_ngram(dimension: usize) -> Self {
        Self {
            model_name: CHARACTER_NGRAM_MODEL.to_string(),
            dimension: dimension.max(1),
            model: LocalModel::CharacterNgram,
        }
    }

    pub fn load(model: Option<&str>, dimension: Option<usize>) -> Result<Self, IngestError> {
        match model.map(str::trim).filter(|model| !model.is_empty()) {
            Some(CHARACTER_NGRAM_MODEL) => Ok(Self::character_ngram(
                dimension.unwrap_or(DEFAULT_LOCAL_DIMENSION),
            )),
            Some(code) => Self::load_onnx(code, dimension),
            None => Self::load_onnx(DEFAULT_LOCAL_MODEL, dimension),
        }
    }

    #[cfg(feature = "fastembed")]
    fn load_onnx(code: &str, dimension: Option<usize>) -> Result<Self, IngestError> {
        use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
        use std::str::FromStr;

        let model_name = if code == DEFAULT_LOCAL_MODEL {
            EmbeddingModel::AllMiniLML6V2
        } else {
            EmbeddingModel::from_str(code).map_err(|err| {
                IngestError::Configuration(format!("unknown local embedding model '{code}': {err}"))
            })?
        };
        let native_dimension = EmbeddingModel::get_model_info(&model_name)
            .map(|info| info.dim)
            .ok_or_else(|| {
                IngestError::Configuration(format!("no model metadata for '{code}'"))
            })?;
        if let Some(requested) = dimension {
            if requested != native_dimension {
                return Err(IngestError::Configuration(format!(
                    "model '{code}' produces {native_dimension}-dimensional vectors, not {requested}"
                )));
            }
        }

        let options = TextInitOptions::new(model_name).with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|err| IngestError::Configuration(format!("loading '{code}': {err}")))?;

        Ok(Self {
            model_name: code.to_string(),
            dimension: native_dimension,
            model: LocalModel::FastEmbed(std::sync::Mutex::new(model)),
        })
    }

    #[cfg(not(feature = "fastembed"))]
    fn load_onnx(code: &str, _dimension: Option<usize>) -> Result<Self, IngestError> {
        Err(IngestError::Configuration(format!(
            "local model '{code}' needs the `fastembed` feature; set EMBEDDING_MODEL={CHARACTER_NGRAM_MODEL} to run without it"
        )))
    }
}

impl EmbeddingProvider for LocalModelProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        match &self.model {
            LocalModel::CharacterNgram => Ok(texts
                .iter()
                .map(|text| character_ngram_embedding(text, self.dimension))
                .collect()),
            #[cfg(feature = "fastembed")]
            LocalModel::FastEmbed(model) => {
                if texts.is_empty() {
                    return Ok(Vec::new());
                }
                let mut guard = model
                    .lock()
                    .map_err(|_| IngestError::Embedding("local model lock poisoned".to_string()))?;
                guard
                    .embed(texts.to_vec(), None)
                    .map_err(|err| IngestError::Embedding(err.to_string()))
            }
        }
    }
}

fn character_ngram_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dimension];
    let chars: Vec<char> = text.to_lowercase().chars().collect();

    for window in chars.windows(3) {
        let mut hash = 1469598103934665603u64;
        for ch in window {
            let mut buffer = [0u8; 4];
            for byte in ch.encode_utf8(&mut buffer).bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
        }
        let bucket = (hash % dimension as u64) as usize;
        vector[bucket] += 1.0;
    }

    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in &mut vector {
            *value /= magnitude;
        }
    }

    vector
}
