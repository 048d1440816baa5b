// Sentence embeddings with paraphrase-multilingual-MiniLM-L12-v2.
//
// French and English news copy land in one 384-dimensional space, so a story
// told by a TV channel and by a newspaper clusters together even when the
// wording differs. The model runs locally through ONNX Runtime; token
// embeddings are mean-pooled over the attention mask, then L2-normalized so
// cosine distance is a plain dot product.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use super::download::MODEL_NAME;
use super::embedder::{l2_normalize, DocumentEmbedder};

/// Hidden size of the multilingual MiniLM.
pub const EMBEDDING_DIM: usize = 384;

/// Longer inputs are truncated; articles lead with their substance.
const MAX_TOKENS: usize = 256;

pub struct OnnxEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    pad_id: i64,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                anyhow::bail!(
                    "Embedding model file not found: {}\nRun `agenda download-model`, or set AGENDA_EMBEDDER=hashed.",
                    path.display()
                );
            }
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load embedding model from {}", model_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load embedding tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
        let pad_id = tokenizer.token_to_id("<pad>").map(i64::from).unwrap_or(0);

        debug!(model = MODEL_NAME, dir = %model_dir.display(), "Loaded sentence embedding model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            pad_id,
        })
    }
}

#[async_trait]
impl DocumentEmbedder for OnnxEmbedder {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let pad_id = self.pad_id;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || embed_sync(&session, &tokenizer, pad_id, &texts))
            .await
            .context("spawn_blocking panicked")?
    }
}

/// Tokenize, run the model and pool. Runs on the blocking pool.
fn embed_sync(
    session: &Arc<Mutex<Session>>,
    tokenizer: &Arc<Tokenizer>,
    pad_id: i64,
    texts: &[String],
) -> Result<Vec<Vec<f64>>> {
    let encodings: Vec<_> = texts
        .iter()
        .map(|t| {
            tokenizer
                .encode(t.as_str(), true)
                .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch_size = encodings.len();
    let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

    if max_len == 0 {
        return Ok(vec![vec![0.0; EMBEDDING_DIM]; batch_size]);
    }

    let mut input_ids: Vec<i64> = Vec::with_capacity(batch_size * max_len);
    let mut attention_mask: Vec<i64> = Vec::with_capacity(batch_size * max_len);

    for enc in &encodings {
        let ids = enc.get_ids();
        let pad_len = max_len - ids.len();

        input_ids.extend(ids.iter().map(|&id| i64::from(id)));
        input_ids.extend(std::iter::repeat_n(pad_id, pad_len));
        attention_mask.extend(enc.get_attention_mask().iter().map(|&m| i64::from(m)));
        attention_mask.extend(std::iter::repeat_n(0i64, pad_len));
    }
    let token_type_ids = vec![0i64; batch_size * max_len];

    let shape = [batch_size as i64, max_len as i64];
    let input_ids_tensor =
        Tensor::from_array((shape, input_ids)).context("Failed to create input_ids tensor")?;
    let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
        .context("Failed to create attention_mask tensor")?;
    let token_type_ids_tensor =
        Tensor::from_array((shape, token_type_ids)).context("Failed to create token_type_ids tensor")?;

    // last_hidden_state: [batch, seq_len, 384]
    let hidden_states = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            })
            .context("Embedding ONNX inference failed")?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract embedding output tensor")?;

        data.to_vec()
    };

    if hidden_states.len() != batch_size * max_len * EMBEDDING_DIM {
        anyhow::bail!(
            "Unexpected embedding output size {} for batch {}x{}",
            hidden_states.len(),
            batch_size,
            max_len
        );
    }

    let mut embeddings = Vec::with_capacity(batch_size);
    for i in 0..batch_size {
        let mut pooled = vec![0.0_f64; EMBEDDING_DIM];
        let mut mask_sum = 0.0_f64;

        for j in 0..max_len {
            if attention_mask[i * max_len + j] == 0 {
                continue;
            }
            mask_sum += 1.0;
            let offset = (i * max_len + j) * EMBEDDING_DIM;
            for (k, slot) in pooled.iter_mut().enumerate() {
                *slot += f64::from(hidden_states[offset + k]);
            }
        }

        if mask_sum > 0.0 {
            for v in &mut pooled {
                *v /= mask_sum;
            }
        }
        l2_normalize(&mut pooled);
        embeddings.push(pooled);
    }

    debug!(batch_size, dim = EMBEDDING_DIM, "Computed sentence embeddings");
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_files() {
        let dir = std::env::temp_dir().join("agenda-onnx-missing");
        let err = OnnxEmbedder::load(&dir).err().unwrap();
        let message = err.to_string();
        assert!(message.contains("model.onnx"));
        assert!(message.contains("download-model"));
    }
}
