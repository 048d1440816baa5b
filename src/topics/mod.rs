// Topics: per-partition NMF topics, cross-day matching, theme taxonomy.

pub mod matching;
pub mod modeler;
pub mod nmf;
pub mod themes;

pub use modeler::{model_topics, TopicConfig};
pub use themes::ThemeTaxonomy;
