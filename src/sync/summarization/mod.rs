//! Summarization of captured pages (LLM with a local fallback).

pub mod fallback;
pub mod llm_summarizer;

pub use fallback::{FallbackSummarizer, Summarizer, SummaryFuture, fallback_summary};
pub use llm_summarizer::OllamaSummarizer;
