pub mod client;
pub mod prompts;

pub use client::{GenAiModel, LanguageModel, NoopModel};
