//! LLM-based summarization of captured pages.
//!
//! Falls back to the local sentence summary whenever the model is unreachable
//! or returns nothing usable.

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::ollama;
use tracing::{debug, warn};

use crate::sync::core::config::SummaryConfig;
use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::summarization::fallback::{
    Summarizer, SummaryFuture, fallback_summary, truncate_to_chars,
};

/// System prompt for page summarization.
const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the following text concisely.";

/// Characters of page text sent to the model.
const MAX_INPUT_CHARS: usize = 4000;

/// Ollama-backed summarizer.
pub struct OllamaSummarizer {
    model: ollama::CompletionModel,
    max_chars: usize,
}

impl OllamaSummarizer {
    /// Create a new Ollama summarizer.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be built.
    pub fn new(config: &SummaryConfig) -> SyncResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(SyncError::from)?;
        let model = client.completion_model(config.model.clone());

        Ok(Self {
            model,
            max_chars: config.max_chars,
        })
    }

    async fn summarize_with_model(&self, text: &str) -> SyncResult<String> {
        let prompt = truncate_to_chars(text, MAX_INPUT_CHARS);
        let max_tokens = u64::try_from(self.max_chars).unwrap_or(u64::MAX);

        let request = self
            .model
            .completion_request(prompt)
            .preamble(SUMMARY_SYSTEM_PROMPT.to_string())
            .temperature(0.3)
            .max_tokens_opt(Some(max_tokens))
            .build();

        let response = self.model.completion(request).await?;
        Ok(extract_text(&response.choice).trim().to_string())
    }
}

impl Summarizer for OllamaSummarizer {
    fn summarize<'a>(&'a self, text: &'a str) -> SummaryFuture<'a> {
        Box::pin(async move {
            if text.trim().is_empty() {
                return Ok(String::new());
            }

            match self.summarize_with_model(text).await {
                Ok(summary) if !summary.is_empty() => {
                    debug!(chars = summary.chars().count(), "LLM summary produced");
                    Ok(truncate_to_chars(&summary, self.max_chars))
                }
                Ok(_) => {
                    warn!("LLM returned an empty summary, using fallback");
                    Ok(fallback_summary(text, self.max_chars))
                }
                Err(err) => {
                    warn!(error = %err, "LLM summarization failed, using fallback");
                    Ok(fallback_summary(text, self.max_chars))
                }
            }
        })
    }
}

/// Extract text from assistant response.
fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> SummaryConfig {
        SummaryConfig {
            max_chars: 40,
            use_llm: true,
            model: "missing-model".to_string(),
            base_url: Some("http://127.0.0.1:9".to_string()),
        }
    }

    #[tokio::test]
    async fn test_empty_input_skips_model() {
        let summarizer = OllamaSummarizer::new(&unreachable_config()).unwrap();
        assert_eq!(summarizer.summarize("  ").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unreachable_model_falls_back() {
        let summarizer = OllamaSummarizer::new(&unreachable_config()).unwrap();
        let text = "Short one. Another short one. And a much longer closing sentence.";
        let summary = summarizer.summarize(text).await.unwrap();
        assert_eq!(summary, fallback_summary(text, 40));
    }
}
