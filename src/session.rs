use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{Agent, AgentConfig, AgentReply};
use crate::config::ModelConfig;
use crate::conversation::{Conversation, Turn};
use crate::error::{ChatError, Result};
use crate::hooks::AgentObserver;
use crate::llm::{GroqClient, LanguageModel};
use crate::tool::ToolRegistry;

/// API key for the chat-completion endpoint. Kept in memory only and never
/// printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Blank input yields `None`.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into().trim().to_string();
        (!secret.is_empty()).then_some(Self(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Builds the model a session talks to from that session's credential.
pub trait ModelFactory: Send + Sync {
    type Model: LanguageModel + 'static;

    fn build(&self, credential: &Credential) -> Result<Arc<Self::Model>>;
}

pub struct GroqFactory {
    config: ModelConfig,
}

impl GroqFactory {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelFactory for GroqFactory {
    type Model = GroqClient;

    fn build(&self, credential: &Credential) -> Result<Arc<GroqClient>> {
        Ok(Arc::new(GroqClient::from_config(
            &self.config,
            credential.expose(),
        )?))
    }
}

/// One browser conversation: its transcript, its key, and the shared tools.
pub struct ChatSession<F: ModelFactory> {
    conversation: Conversation,
    credential: Option<Credential>,
    factory: Arc<F>,
    tools: Arc<ToolRegistry>,
    agent_config: AgentConfig,
    temperature: Option<f32>,
}

impl<F: ModelFactory> ChatSession<F> {
    pub fn new(factory: Arc<F>, tools: Arc<ToolRegistry>, agent_config: AgentConfig) -> Self {
        Self {
            conversation: Conversation::new(),
            credential: None,
            factory,
            tools,
            agent_config,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn set_credential(&mut self, secret: impl Into<String>) {
        self.credential = Credential::new(secret);
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Record the user's text, run the agent over the conversation and record
    /// its answer. On error nothing but the user turn is recorded.
    pub async fn submit(
        &mut self,
        text: &str,
        observer: &dyn AgentObserver,
    ) -> Result<AgentReply> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        self.conversation.append(Turn::user(text));

        let credential = self.credential.as_ref().ok_or_else(|| {
            ChatError::Authentication("enter a Groq API key before asking questions".into())
        })?;
        let model = self.factory.build(credential)?;
        let agent = Agent::new(model, Arc::clone(&self.tools))
            .with_config(self.agent_config.clone())
            .with_temperature(self.temperature);

        let reply = match agent.respond(self.conversation.all(), observer).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "turn failed");
                return Err(err);
            }
        };

        info!(
            turns = self.conversation.len() + 1,
            exhausted = matches!(reply, AgentReply::Exhausted { .. }),
            "turn answered"
        );
        self.conversation.append(Turn::assistant(reply.text()));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Speaker, GREETING};
    use crate::hooks::NoopObserver;
    use crate::StubModel;

    struct Scripted(Arc<StubModel>);

    impl ModelFactory for Scripted {
        type Model = StubModel;

        fn build(&self, _credential: &Credential) -> Result<Arc<StubModel>> {
            Ok(Arc::clone(&self.0))
        }
    }

    fn session(responses: Vec<&str>) -> ChatSession<Scripted> {
        let model = StubModel::new(responses.into_iter().map(String::from).collect());
        ChatSession::new(
            Arc::new(Scripted(model)),
            Arc::new(ToolRegistry::new()),
            AgentConfig::default(),
        )
    }

    struct Rejecting;

    #[async_trait::async_trait]
    impl LanguageModel for Rejecting {
        async fn complete_chat(
            &self,
            _messages: &[crate::message::Message],
            _options: &crate::llm::CompletionOptions,
        ) -> Result<crate::llm::ModelCompletion> {
            Err(ChatError::Authentication("Groq rejected the API key: Invalid API Key".into()))
        }
    }

    struct RejectingFactory;

    impl ModelFactory for RejectingFactory {
        type Model = Rejecting;

        fn build(&self, _credential: &Credential) -> Result<Arc<Rejecting>> {
            Ok(Arc::new(Rejecting))
        }
    }

    #[tokio::test]
    async fn rejected_credential_records_no_answer() {
        let mut chat = ChatSession::new(
            Arc::new(RejectingFactory),
            Arc::new(ToolRegistry::new()),
            AgentConfig::default(),
        );
        chat.set_credential("gsk_revoked");

        let err = chat.submit("capital of France?", &NoopObserver).await.unwrap_err();
        assert_eq!(err.kind(), "authentication");
        assert_eq!(chat.conversation().len(), 2);
        assert_eq!(
            chat.conversation().last(),
            Some(&Turn::user("capital of France?"))
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("gsk_secret").unwrap();
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        assert!(Credential::new("   ").is_none());
    }

    #[tokio::test]
    async fn records_user_and_assistant_turns() {
        let mut chat = session(vec!["Final Answer: Paris"]);
        chat.set_credential("gsk_test");

        let reply = chat
            .submit("What is the capital of France?", &NoopObserver)
            .await
            .unwrap();

        assert_eq!(reply.text(), "Paris");
        let turns = chat.conversation().all();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, GREETING);
        assert_eq!(turns[1], Turn::user("What is the capital of France?"));
        assert_eq!(turns[2], Turn::assistant("Paris"));
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_recording() {
        let mut chat = session(vec![]);
        chat.set_credential("gsk_test");

        let err = chat.submit("  \n", &NoopObserver).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyInput));
        assert_eq!(chat.conversation().len(), 1);
    }

    #[tokio::test]
    async fn missing_credential_fails_but_session_recovers() {
        let mut chat = session(vec!["Final Answer: Paris"]);

        let err = chat.submit("capital of France?", &NoopObserver).await.unwrap_err();
        assert_eq!(err.kind(), "authentication");
        assert_eq!(chat.conversation().len(), 2);
        assert_eq!(chat.conversation().last().unwrap().role, Speaker::User);

        chat.set_credential("gsk_test");
        let reply = chat.submit("capital of France?", &NoopObserver).await.unwrap();
        assert_eq!(reply.text(), "Paris");
        assert_eq!(chat.conversation().len(), 4);
    }
}
