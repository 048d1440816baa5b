// Text: sparse term/document counts and TF-IDF weighting.

pub mod matrix;

pub use matrix::TermDocumentMatrix;
