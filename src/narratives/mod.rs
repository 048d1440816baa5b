pub mod clusterer;
pub mod download;
pub mod embedder;
pub mod hashed;
pub mod kmeans;
pub mod onnx;
pub mod summary;

pub use clusterer::{ClusterCount, NarrativeConfig};
pub use embedder::DocumentEmbedder;
pub use hashed::HashedEmbedder;
pub use onnx::OnnxEmbedder;
