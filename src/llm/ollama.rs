use crate::llm::client::LLMClient;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, request::ChatMessageRequest},
};

#[derive(Debug)]
pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    pub async fn new(base_url: String, model: String) -> Result<Self> {
        // Ollama::new panics on anything Url::parse rejects, so the base URL
        // is validated here and handed over scheme-qualified.
        let url = reqwest::Url::parse(&base_url).map_err(|e| {
            AppError::Configuration(format!("Invalid Ollama base URL '{base_url}': {e}"))
        })?;
        let host = url.host_str().ok_or_else(|| {
            AppError::Configuration(format!("Ollama base URL '{base_url}' has no host"))
        })?;
        let port = url.port().unwrap_or(11434);

        let client = Ollama::new(format!("{}://{host}", url.scheme()), port);

        Ok(Self { client, model })
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatMessageRequest::new(self.model.clone(), messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AppError::LLM(format!("Ollama error: {}", e)))?;

        Ok(response.message.content)
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ChatMessage::user(prompt.to_string())]).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ])
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
