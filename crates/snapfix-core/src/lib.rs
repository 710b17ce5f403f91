//! Core snapfix library (conversation log, media normalization, prompt
//! building, model gateway, search/upload providers, pipeline).

pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod media;
pub mod pipeline;
pub mod prompt;
pub mod prompts;
pub mod search;
pub mod upload;
