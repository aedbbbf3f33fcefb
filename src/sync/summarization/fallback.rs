//! Summarizer abstraction and the local, model-free summary.

use std::future::Future;
use std::pin::Pin;

use crate::sync::core::errors::SyncResult;

/// Boxed future type for summarizer operations.
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = SyncResult<String>> + Send + 'a>>;

/// Produces a short summary of captured page text.
pub trait Summarizer: Send + Sync {
    /// Summarize `text`. Empty input yields an empty summary, not an error.
    ///
    /// # Errors
    /// Returns an error only if the summarizer cannot produce any output.
    fn summarize<'a>(&'a self, text: &'a str) -> SummaryFuture<'a>;
}

/// Summarizer that never leaves the process.
#[derive(Clone, Debug)]
pub struct FallbackSummarizer {
    max_chars: usize,
}

impl FallbackSummarizer {
    /// Create a summarizer with a character budget.
    #[must_use]
    pub const fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Summarizer for FallbackSummarizer {
    fn summarize<'a>(&'a self, text: &'a str) -> SummaryFuture<'a> {
        Box::pin(async move { Ok(fallback_summary(text, self.max_chars)) })
    }
}

/// Keep whole sentences while they fit in `max_chars`; if not even the first
/// sentence fits, hard-truncate the text instead.
#[must_use]
pub fn fallback_summary(text: &str, max_chars: usize) -> String {
    let mut summary = String::new();
    let mut used = 0;

    for sentence in text.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        let len = sentence.chars().count();
        if used + len >= max_chars {
            break;
        }
        summary.push_str(sentence);
        summary.push_str(". ");
        used += len + 2;
    }

    let summary = summary.trim_end();
    if summary.is_empty() {
        truncate_to_chars(text.trim(), max_chars)
    } else {
        summary.to_string()
    }
}

/// Truncate a string to a maximum number of characters.
#[must_use]
pub fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_whole_sentences_within_budget() {
        let text = "First sentence. Second one. A third sentence that is rather long.";
        assert_eq!(fallback_summary(text, 30), "First sentence. Second one.");
    }

    #[test]
    fn test_hard_truncates_single_long_sentence() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(fallback_summary(text, 10), "abcdefghij");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(fallback_summary("", 200), "");
        assert_eq!(fallback_summary("   ", 200), "");
    }

    #[test]
    fn test_truncate_to_chars_multibyte() {
        assert_eq!(truncate_to_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_to_chars("short", 100), "short");
    }

    #[tokio::test]
    async fn test_fallback_summarizer_trait() {
        let summarizer = FallbackSummarizer::new(200);
        let summary = summarizer.summarize("Rust is fast. It is safe.").await.unwrap();
        assert_eq!(summary, "Rust is fast. It is safe.");
    }
}
