use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use parley_core::errors::CollaboratorError;

use crate::collaborators::{GenerationRequest, TextGenerator};

/// Raw completion seam for model backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Adapts an [`LlmClient`] into the pipeline's generation contract.
pub struct LlmTextGenerator {
    client: Arc<dyn LlmClient>,
}

impl LlmTextGenerator {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

pub fn build_prompt(request: &GenerationRequest) -> String {
    match request.context.as_deref().map(str::trim).filter(|context| !context.is_empty()) {
        Some(context) => format!("Context: {context}\n\nUser reply: {}", request.prompt),
        None => request.prompt.clone(),
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        let prompt = build_prompt(&request);
        let completion = self
            .client
            .complete(&prompt)
            .await
            .map_err(|error| CollaboratorError::Failed(format!("{error:#}")))?;

        let completion = completion.trim();
        if completion.is_empty() {
            return Err(CollaboratorError::Failed("empty completion".to_string()));
        }
        Ok(completion.to_string())
    }
}
