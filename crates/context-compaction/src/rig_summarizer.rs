//! Production summarizer backed by a Rig agent on an OpenAI-compatible
//! endpoint.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::debug;

use crate::config::SummarizerEndpoint;
use crate::errors::SummarizationError;
use crate::summarizer::{SummaryRequest, Summarizer};

/// Summarizer that issues one completion per record.
pub struct RigSummarizer {
    client: openai::CompletionsClient,
    model: String,
}

impl RigSummarizer {
    pub fn from_endpoint(endpoint: &SummarizerEndpoint) -> anyhow::Result<Self> {
        let client = openai::CompletionsClient::builder()
            .api_key(&endpoint.api_key)
            .base_url(&endpoint.base_url)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build summarizer client: {e}"))?;
        Ok(Self {
            client,
            model: endpoint.model.clone(),
        })
    }
}

#[async_trait]
impl Summarizer for RigSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummarizationError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(request.style.instruction())
            .temperature(request.temperature)
            .max_tokens(request.max_output_tokens as u64)
            .build();

        debug!(
            model = %self.model,
            style = %request.style,
            max_output_tokens = request.max_output_tokens,
            "requesting summary"
        );

        agent
            .prompt(&request.text)
            .await
            .map_err(|e| SummarizationError::backend(&self.model, e.to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
