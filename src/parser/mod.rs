//! Classification of free-text instructions into queueable work.
//!
//! The rules run in a fixed order: control words, variable-definition
//! blocks, multi-step lists, conversational guidance, then single-command
//! parsing (LLM-assisted when a model is configured, deterministic
//! otherwise). The parser observes page context but never mutates the
//! browser or the queue.

pub mod control;
pub mod llm;
pub mod multistep;
pub mod single;
pub mod variables;

use std::sync::Arc;
use thiserror::Error;

use crate::llm::{prompts, LanguageModel};
use crate::models::{Action, Variable};
pub use self::control::ControlKind;
use self::llm::LlmVerdict;

/// Read-only page context the parser may consult.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub screenshot_base64: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ParseResult {
    Control { kind: ControlKind },
    VariableDefinitions { variables: Vec<Variable> },
    MultiStep { steps: Vec<String> },
    Single { action: Action },
    Guidance { response: String },
}

/// No classification rule scored the instruction.
#[derive(Debug, Error)]
#[error("Could not understand the instruction: {0}")]
pub struct ParseAmbiguous(pub String);

pub struct InstructionParser {
    model: Arc<dyn LanguageModel>,
}

impl InstructionParser {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn parse(
        &self,
        text: &str,
        context: Option<&PageContext>,
    ) -> Result<ParseResult, ParseAmbiguous> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ParseAmbiguous("empty instruction".to_string()));
        }

        // 1. Control words.
        if let Some(kind) = control::parse_control(trimmed) {
            return Ok(ParseResult::Control { kind });
        }

        // 2. Variable-definition blocks.
        if variables::is_definition_block(trimmed) {
            let variables = variables::parse_definitions(trimmed);
            return Ok(ParseResult::VariableDefinitions { variables });
        }

        // 3. Multi-step lists. A split that yields a single step is
        // re-classified as that step alone.
        if multistep::is_multi_step(trimmed) {
            let steps = multistep::split_steps(trimmed);
            match steps.len() {
                0 => {}
                1 => {
                    if let Some(action) = single::parse_single(&steps[0]) {
                        return Ok(ParseResult::Single { action });
                    }
                }
                _ => return Ok(ParseResult::MultiStep { steps }),
            }
        }

        // 4. Conversational guidance.
        if trimmed.ends_with('?') && trimmed.len() > 10 {
            return Ok(ParseResult::Guidance {
                response: self.guidance_reply(trimmed).await,
            });
        }

        // 5. Single-command parse, LLM first when available.
        if self.model.is_enabled() {
            if let Some(result) = self.llm_parse(trimmed, context).await {
                return Ok(result);
            }
        }

        if let Some(action) = single::parse_single(trimmed) {
            return Ok(ParseResult::Single { action });
        }

        Err(ParseAmbiguous(trimmed.to_string()))
    }

    async fn guidance_reply(&self, question: &str) -> String {
        if self.model.is_enabled() {
            let prompt = format!("{}{}", prompts::GUIDANCE_PROMPT, question);
            if let Ok(reply) = self.model.complete(&prompt, None).await {
                if !reply.trim().is_empty() {
                    return reply.trim().to_string();
                }
            }
        }
        "I can navigate, click, type, record scripts and replay them. \
         Try an instruction like \"go to example.com\" or \"click Sign in\"."
            .to_string()
    }

    async fn llm_parse(&self, text: &str, context: Option<&PageContext>) -> Option<ParseResult> {
        let mut prompt = format!("{}{}", prompts::PARSE_PROMPT, text);
        if let Some(ctx) = context {
            if !ctx.url.is_empty() {
                prompt.push_str(&format!("\n\nCurrent page: {} ({})", ctx.url, ctx.title));
            }
        }
        let screenshot = context.and_then(|c| c.screenshot_base64.as_deref());

        let response = match self.model.complete(&prompt, screenshot).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("LLM parse failed, falling back to rules: {}", e);
                return None;
            }
        };

        match llm::interpret(&response)? {
            LlmVerdict::VariableDefinitions => {
                let vars = variables::parse_definitions(text);
                if vars.is_empty() {
                    None
                } else {
                    Some(ParseResult::VariableDefinitions { variables: vars })
                }
            }
            LlmVerdict::MultiStep { steps } => {
                let steps = if steps.is_empty() {
                    multistep::split_steps(text)
                } else {
                    steps
                };
                if steps.is_empty() {
                    None
                } else {
                    Some(ParseResult::MultiStep { steps })
                }
            }
            LlmVerdict::SingleCommand {
                command,
                target,
                value,
                strategy: _,
            } => llm::command_to_action(&command, target.as_deref(), value.as_deref())
                .map(|action| ParseResult::Single { action }),
            LlmVerdict::Conversation { response } => {
                if response.is_empty() {
                    None
                } else {
                    Some(ParseResult::Guidance { response })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NoopModel;
    use crate::models::Action;

    fn parser() -> InstructionParser {
        InstructionParser::new(Arc::new(NoopModel))
    }

    #[tokio::test]
    async fn control_words_classify_first() {
        let result = parser().parse("pause automation", None).await.unwrap();
        assert!(matches!(
            result,
            ParseResult::Control {
                kind: ControlKind::Pause
            }
        ));
    }

    #[tokio::test]
    async fn variable_blocks_classify_before_multi_step() {
        let result = parser()
            .parse("${LOGIN_URL} https://a.test ${LOGIN_USER} alice", None)
            .await
            .unwrap();
        match result {
            ParseResult::VariableDefinitions { variables } => {
                assert_eq!(variables.len(), 2);
            }
            other => panic!("{:?}", other),
        }
    }

    #[tokio::test]
    async fn multi_step_lists_are_split() {
        let result = parser()
            .parse("1. Go to a.test\n2. Click Login", None)
            .await
            .unwrap();
        match result {
            ParseResult::MultiStep { steps } => assert_eq!(steps.len(), 2),
            other => panic!("{:?}", other),
        }
    }

    #[tokio::test]
    async fn questions_become_guidance() {
        let result = parser()
            .parse("what can you automate for me?", None)
            .await
            .unwrap();
        assert!(matches!(result, ParseResult::Guidance { .. }));
    }

    #[tokio::test]
    async fn plain_commands_resolve_to_actions() {
        let result = parser().parse("go to example.com", None).await.unwrap();
        match result {
            ParseResult::Single {
                action: Action::Navigate { url },
            } => assert_eq!(url, "https://example.com"),
            other => panic!("{:?}", other),
        }
    }

    #[tokio::test]
    async fn unclassifiable_text_is_ambiguous() {
        assert!(parser().parse("mauve is a color", None).await.is_err());
    }

    #[tokio::test]
    async fn classification_is_stable() {
        let parser = parser();
        for _ in 0..3 {
            let result = parser.parse("click Sign in", None).await.unwrap();
            assert!(matches!(result, ParseResult::Single { .. }));
        }
    }
}
