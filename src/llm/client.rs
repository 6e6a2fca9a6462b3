use anyhow::{anyhow, Result};
use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatRequest, ChatResponse, ContentPart};
use genai::Client;

/// The single capability the orchestrator needs from a language model.
///
/// The core calls it unconditionally; when no model is configured the
/// no-op implementation absorbs the call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Complete a prompt, optionally grounded with a JPEG screenshot.
    async fn complete(&self, prompt: &str, image_base64: Option<&str>) -> Result<String>;
}

/// genai-backed model. The provider (Anthropic/OpenAI/Gemini) is
/// auto-detected from the model id prefix; API keys come from the
/// provider's usual environment variable.
pub struct GenAiModel {
    client: Client,
    model: String,
}

impl GenAiModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for GenAiModel {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &str, image_base64: Option<&str>) -> Result<String> {
        let message = match image_base64 {
            Some(image) => {
                let parts = vec![
                    ContentPart::from_text(prompt.to_string()),
                    ContentPart::from_binary_base64(
                        "image/jpeg",
                        image.to_string(),
                        Some("page.jpg".to_string()),
                    ),
                ];
                ChatMessage::user(parts)
            }
            None => ChatMessage::user(prompt),
        };

        let request = ChatRequest::new(vec![message]);

        let response: ChatResponse = self
            .client
            .exec_chat(&self.model, request, None)
            .await
            .map_err(|e| anyhow!("LLM request failed: {}", e))?;

        let text = response
            .first_text()
            .ok_or_else(|| anyhow!("No text in LLM response"))?
            .to_string();

        Ok(text)
    }
}

/// Absorbs completions when no model is configured.
pub struct NoopModel;

#[async_trait]
impl LanguageModel for NoopModel {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn complete(&self, _prompt: &str, _image_base64: Option<&str>) -> Result<String> {
        Ok(String::new())
    }
}

/// Strip markdown code fences that models love wrapping JSON in.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
