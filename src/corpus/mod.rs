// Corpus: cleaned documents, their partitions, and lemma filtering.

pub mod document;
pub mod filter;
pub mod reader;

pub use document::{partition_documents, CleanedDocument, MediaType, Partition, ALL_SOURCES};
pub use filter::LemmaFilter;
pub use reader::{CorpusReader, MemoryCorpus, StoreCorpus};
