//! Tone-mimicking responder
//!
//! Continues a channel conversation in the voice of a chosen user, one
//! stateless chat-completions call per turn against an OpenAI-compatible
//! endpoint. The conversation is seeded with the channel transcript and the
//! target user's profile.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::ChatMessage;
use crate::config::MimicConfig;
use crate::users::UserProfile;

#[derive(Debug, Clone, Serialize)]
struct ChatTurn {
    role: String,
    content: String,
}

impl ChatTurn {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Conversation state for one mimic sub-loop
#[derive(Debug)]
pub struct MimicSession {
    pub target: String,
    turns: Vec<ChatTurn>,
}

impl MimicSession {
    #[cfg(test)]
    fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

/// Chat-completions client for tone mimicking
pub struct MimicResponder {
    client: reqwest::Client,
    config: MimicConfig,
}

impl MimicResponder {
    pub fn new(config: MimicConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Seed a conversation from the channel transcript and target profile
    pub fn start_session(
        &self,
        target: &str,
        profile: &UserProfile,
        transcript: &[ChatMessage],
    ) -> MimicSession {
        let profile_line = format!(
            "User Name: {}, User Age: {}, User Location: {}",
            profile.user_name, profile.user_age, profile.user_location
        );
        let transcript_text = transcript
            .iter()
            .map(|m| format!("{}: {}", m.username, m.message))
            .collect::<Vec<_>>()
            .join("\n");

        let turns = vec![
            ChatTurn::new(
                "system",
                format!(
                    "You are a chatbot that continues conversations by mimicking the tone \
                     and style of {} based on the existing chat history and user \
                     information for {} as {}.",
                    target, target, profile_line
                ),
            ),
            ChatTurn::new(
                "user",
                format!("Here is the chat history for context:\n{}", transcript_text),
            ),
        ];

        MimicSession {
            target: target.to_string(),
            turns,
        }
    }

    /// One conversational turn; errors surface to the caller and end the loop
    pub async fn reply(&self, session: &mut MimicSession, input: &str) -> Result<String> {
        if self.config.api_key.is_empty() {
            anyhow::bail!("mimic API key not configured");
        }

        session.turns.push(ChatTurn::new("user", input.to_string()));

        let request = CompletionRequest {
            model: &self.config.model,
            messages: &session.turns,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response: CompletionResponse = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("completion request failed")?
            .error_for_status()
            .context("completion provider returned an error")?
            .json()
            .await
            .context("failed to parse completion response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .context("completion carried no choices")?
            .message
            .content
            .trim()
            .to_string();

        session
            .turns
            .push(ChatTurn::new("assistant", content.clone()));

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_profile() -> UserProfile {
        UserProfile {
            user_name: "alice".to_string(),
            user_age: "30".to_string(),
            user_gender: "f".to_string(),
            user_location: "Nashville".to_string(),
        }
    }

    #[test]
    fn test_session_seeded_with_transcript_and_profile() {
        let responder = MimicResponder::new(MimicConfig::default());
        let transcript = vec![
            ChatMessage::new("alice", "howdy"),
            ChatMessage::new("bob", "hi"),
        ];

        let session = responder.start_session("alice", &sample_profile(), &transcript);
        assert_eq!(session.target, "alice");
        assert_eq!(session.turn_count(), 2);
        assert!(session.turns[0].content.contains("alice"));
        assert!(session.turns[0].content.contains("Nashville"));
        assert!(session.turns[1].content.contains("alice: howdy"));
    }

    #[tokio::test]
    async fn test_reply_without_key_fails() {
        let responder = MimicResponder::new(MimicConfig::default());
        let mut session = responder.start_session("alice", &sample_profile(), &[]);
        assert!(responder.reply(&mut session, "hello").await.is_err());
    }

    #[tokio::test]
    async fn test_reply_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": " sure thing "}}]
            })))
            .mount(&server)
            .await;

        let config = MimicConfig {
            api_url: server.uri(),
            api_key: "test-key".to_string(),
            ..MimicConfig::default()
        };
        let responder = MimicResponder::new(config);

        let mut session = responder.start_session("alice", &sample_profile(), &[]);
        let reply = responder.reply(&mut session, "how are you?").await.unwrap();

        assert_eq!(reply, "sure thing");
        // system + seed + user + assistant
        assert_eq!(session.turn_count(), 4);
    }
}
