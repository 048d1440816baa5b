// agenda: media agenda analytics over a cleaned news corpus.
//
// This is the library root. Each stage of the daily batch has its own module
// and writes its own tables; `pipeline` runs them in dependency order.

pub mod bias;
pub mod config;
pub mod corpus;
pub mod db;
pub mod error;
pub mod keywords;
pub mod lifetime;
pub mod narratives;
pub mod output;
pub mod pipeline;
pub mod spikes;
pub mod status;
pub mod text;
pub mod topics;
