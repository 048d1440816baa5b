// Fetches the sentence embedding model from HuggingFace.
//
// Files land in the platform data directory (~/.local/share/agenda/models/ on
// Linux) and persist across runs. Existing files are never re-downloaded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

pub const MODEL_NAME: &str = "paraphrase-multilingual-MiniLM-L12-v2";

const MODEL_HF_URL: &str =
    "https://huggingface.co/sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2/resolve/main";

/// (remote path, local file name, show progress)
const MODEL_FILES: [(&str, &str, bool); 2] = [
    ("tokenizer.json", "tokenizer.json", false),
    ("onnx/model.onnx", "model.onnx", true),
];

/// ~/.local/share/agenda/models/ on Linux.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agenda")
        .join("models")
}

/// Where the embedding model lives under a model base directory.
pub fn embedding_model_dir(base: &Path) -> PathBuf {
    base.join(MODEL_NAME)
}

pub fn embedding_files_present(base: &Path) -> bool {
    let dir = embedding_model_dir(base);
    MODEL_FILES.iter().all(|(_, local, _)| dir.join(local).exists())
}

/// Download the embedding model into `base`, skipping files already present.
pub async fn download_model(base: &Path) -> Result<()> {
    let dir = embedding_model_dir(base);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    println!("\nSentence embedding model ({MODEL_NAME}):");

    for (remote, local, show_progress) in MODEL_FILES {
        let dest = dir.join(local);
        if dest.exists() {
            info!(file = local, "Model file already exists, skipping");
            println!("  {local} (already exists)");
            continue;
        }
        if show_progress {
            println!("  Downloading {local} (~470 MB)...");
        } else {
            println!("  Downloading {local}...");
        }
        download_file(&format!("{MODEL_HF_URL}/{remote}"), &dest, show_progress).await?;
    }

    Ok(())
}

async fn download_file(url: &str, dest: &Path, show_progress: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let pb = if show_progress {
        let pb = match response.content_length() {
            Some(size) => {
                let pb = ProgressBar::new(size);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
                        .progress_chars("=> "),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(ProgressStyle::default_spinner().template("    {spinner} {bytes}")?);
                pb
            }
        };
        Some(pb)
    } else {
        None
    };

    let bytes = response
        .bytes()
        .await
        .context("Failed to read response body")?;

    if let Some(ref pb) = pb {
        pb.set_position(bytes.len() as u64);
    }

    // An interrupted download leaves only the .part file behind.
    let partial = dest.with_extension("part");
    std::fs::write(&partial, &bytes).with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, dest).with_context(|| format!("Failed to move {} into place", dest.display()))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    info!("Downloaded {} to {}", url, dest.display());
    Ok(())
}
