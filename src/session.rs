use crate::backend::ChatBackend;
use crate::models::{Conversation, Scenario, Turn};
use std::sync::Arc;

/// Drives one scenario to completion against one backend.
///
/// Turns run strictly in scenario order with the growing turn history passed
/// to every call. A failed turn is recorded with its error and the session
/// continues, so the conversation always ends up exactly as long as the
/// scenario and turn alignment across backends is preserved.
pub struct ConversationSession {
    backend: Arc<dyn ChatBackend>,
    system_message: Option<String>,
    verbose: bool,
}

impl ConversationSession {
    pub fn new(backend: Arc<dyn ChatBackend>, system_message: Option<String>, verbose: bool) -> Self {
        Self {
            backend,
            system_message,
            verbose,
        }
    }

    pub async fn run(&self, scenario: &Scenario) -> Conversation {
        let mut conversation = Conversation::new(self.backend.id(), &scenario.name);

        for (index, prompt) in scenario.prompts.iter().enumerate() {
            if self.verbose {
                println!(
                    "  [{}] turn {}/{}: {}",
                    self.backend.id(),
                    index + 1,
                    scenario.prompts.len(),
                    prompt.prompt
                );
            }

            let mut turn = Turn::pending(&prompt.prompt, prompt.image_ref.clone());
            let result = self
                .backend
                .send(
                    &conversation.turns,
                    &prompt.prompt,
                    prompt.image_ref.as_deref(),
                    self.system_message.as_deref(),
                )
                .await;

            match result {
                Ok(reply) => {
                    turn.response = Some(reply.text);
                    turn.latency = Some(reply.latency);
                }
                Err(error) => {
                    if self.verbose {
                        println!("  [{}] turn {} failed: {}", self.backend.id(), index + 1, error);
                    }
                    turn.error = Some(error.to_string());
                }
            }

            conversation.turns.push(turn);
        }

        conversation.end();
        conversation
    }
}
