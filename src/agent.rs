//! Zero-shot ReAct agent.
//!
//! The model is shown the tools and a fixed text format. Each reply is read as
//! either `Action:` / `Action Input:` (run a tool, append the observation and
//! ask again) or `Final Answer:` (stop). The loop is bounded by
//! `max_iterations`.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::conversation::{Speaker, Turn};
use crate::error::{ChatError, Result};
use crate::hooks::{AgentEvent, AgentObserver};
use crate::llm::{CompletionOptions, LanguageModel};
use crate::message::Message;
use crate::tool::ToolRegistry;

/// Returned when the loop runs out of iterations without a final answer.
pub const ITERATION_LIMIT_ANSWER: &str = "Agent stopped due to iteration limit or time limit.";

const FINAL_ANSWER_MARKER: &str = "Final Answer:";
const STOP_SEQUENCES: [&str; 2] = ["\nObservation:", "\n\tObservation:"];

const PREFIX: &str =
    "Answer the following questions as best you can. You have access to the following tools:";

/// How much of the conversation the model sees on each turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// Earlier turns are shown as context ahead of the latest question.
    #[default]
    Full,
    /// Only the latest user turn is sent.
    LastTurn,
}

impl FromStr for HistoryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(HistoryMode::Full),
            "last_turn" | "last-turn" => Ok(HistoryMode::LastTurn),
            other => Err(format!("unknown history mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub history: HistoryMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            history: HistoryMode::Full,
        }
    }
}

/// What the model asked for in one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDirective {
    CallTool {
        thought: String,
        tool: String,
        input: String,
    },
    Finish {
        thought: String,
        answer: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputParseError {
    #[error("Parsing LLM output produced both a final answer and a parse-able action: {0}")]
    AnswerAndAction(String),
    #[error("Could not parse LLM output: `{0}`")]
    MissingAction(String),
    #[error("Could not parse LLM output: `{0}`")]
    MissingActionInput(String),
    #[error("Could not parse LLM output: `{0}`")]
    Unparseable(String),
}

impl OutputParseError {
    /// Hint fed back to the model in place of a tool observation.
    pub fn observation(&self) -> &'static str {
        match self {
            OutputParseError::MissingAction(_) => {
                "Invalid Format: Missing 'Action:' after 'Thought:'"
            }
            OutputParseError::MissingActionInput(_) => {
                "Invalid Format: Missing 'Action Input:' after 'Action:'"
            }
            OutputParseError::AnswerAndAction(_) | OutputParseError::Unparseable(_) => {
                "Invalid or incomplete response"
            }
        }
    }
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("agent output pattern is valid"))
}

/// Read one model reply in the ReAct text format.
pub fn parse_output(text: &str) -> std::result::Result<AgentDirective, OutputParseError> {
    static ACTION: OnceLock<Regex> = OnceLock::new();
    static ACTION_ONLY: OnceLock<Regex> = OnceLock::new();
    static INPUT_ONLY: OnceLock<Regex> = OnceLock::new();

    let action = pattern(
        &ACTION,
        r"(?s)Action\s*\d*\s*:\s*(.*?)\s*Action\s*\d*\s*Input\s*\d*\s*:\s*(.*)",
    );
    let includes_answer = text.contains(FINAL_ANSWER_MARKER);

    if let Some(captures) = action.captures(text) {
        if includes_answer {
            return Err(OutputParseError::AnswerAndAction(text.to_string()));
        }
        let whole = captures.get(0).map_or(0, |m| m.start());
        let tool = captures.get(1).map_or("", |m| m.as_str()).trim();
        let input = captures.get(2).map_or("", |m| m.as_str());
        return Ok(AgentDirective::CallTool {
            thought: text[..whole].trim().to_string(),
            tool: tool.to_string(),
            input: input.trim().trim_matches('"').to_string(),
        });
    }

    if includes_answer {
        let (thought, answer) = text
            .rsplit_once(FINAL_ANSWER_MARKER)
            .unwrap_or(("", text));
        return Ok(AgentDirective::Finish {
            thought: thought.trim().to_string(),
            answer: answer.trim().to_string(),
        });
    }

    if !pattern(&ACTION_ONLY, r"(?s)Action\s*\d*\s*:").is_match(text) {
        Err(OutputParseError::MissingAction(text.to_string()))
    } else if !pattern(&INPUT_ONLY, r"(?s)Action\s*\d*\s*Input\s*\d*\s*:").is_match(text) {
        Err(OutputParseError::MissingActionInput(text.to_string()))
    } else {
        Err(OutputParseError::Unparseable(text.to_string()))
    }
}

/// Drop anything the model wrote past a stop sequence.
fn cut_at_stop(text: &str) -> &str {
    STOP_SEQUENCES
        .iter()
        .filter_map(|stop| text.find(stop))
        .min()
        .map_or(text, |idx| &text[..idx])
}

/// Final result of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentReply {
    Answer(String),
    Exhausted { iterations: usize },
}

impl AgentReply {
    pub fn text(&self) -> &str {
        match self {
            AgentReply::Answer(answer) => answer,
            AgentReply::Exhausted { .. } => ITERATION_LIMIT_ANSWER,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            AgentReply::Answer(answer) => answer,
            AgentReply::Exhausted { .. } => ITERATION_LIMIT_ANSWER.to_string(),
        }
    }
}

impl fmt::Display for AgentReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// A completed tool step kept for the scratchpad.
struct Step {
    log: String,
    observation: String,
}

pub struct Agent<M: LanguageModel> {
    model: Arc<M>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    temperature: Option<f32>,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(model: Arc<M>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            config: AgentConfig::default(),
            temperature: None,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self.config.max_iterations = self.config.max_iterations.max(1);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_history_mode(mut self, history: HistoryMode) -> Self {
        self.config.history = history;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Answer the latest user turn of `history`, reporting each step to `observer`.
    pub async fn respond(
        &self,
        history: &[Turn],
        observer: &dyn AgentObserver,
    ) -> Result<AgentReply> {
        let question_at = history
            .iter()
            .rposition(|turn| turn.role == Speaker::User)
            .ok_or_else(|| ChatError::Protocol("conversation has no user turn to answer".into()))?;
        let question = history[question_at].content.as_str();
        let context = match self.config.history {
            HistoryMode::Full => &history[..question_at],
            HistoryMode::LastTurn => &[],
        };

        let options = CompletionOptions {
            stop: STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
            temperature: self.temperature,
        };
        let mut steps: Vec<Step> = Vec::new();

        for step in 1..=self.config.max_iterations {
            let prompt = self.build_prompt(question, context, &steps);
            let completion = self
                .model
                .complete_chat(&[Message::user(prompt)], &options)
                .await?;
            let output = cut_at_stop(&completion.content).to_string();
            debug!(step, output = %output, "model output");

            match parse_output(&output) {
                Ok(AgentDirective::Finish { thought, answer }) => {
                    info!(step, "agent finished");
                    observer
                        .on_event(&AgentEvent::Finish {
                            step,
                            thought,
                            answer: answer.clone(),
                        })
                        .await;
                    return Ok(AgentReply::Answer(answer));
                }
                Ok(AgentDirective::CallTool {
                    thought,
                    tool,
                    input,
                }) => {
                    let observation = self.observe(&tool, &input).await;
                    observer
                        .on_event(&AgentEvent::ToolStep {
                            step,
                            thought,
                            tool,
                            input,
                            observation: observation.clone(),
                        })
                        .await;
                    steps.push(Step {
                        log: output,
                        observation,
                    });
                }
                Err(err) => {
                    warn!(step, error = %err, "could not parse model output");
                    let observation = err.observation().to_string();
                    observer
                        .on_event(&AgentEvent::ParseError {
                            step,
                            output: output.clone(),
                            observation: observation.clone(),
                        })
                        .await;
                    steps.push(Step {
                        log: output,
                        observation,
                    });
                }
            }
        }

        let iterations = self.config.max_iterations;
        warn!(iterations, "agent reached the iteration limit without a final answer");
        observer
            .on_event(&AgentEvent::IterationLimit { steps: iterations })
            .await;
        Ok(AgentReply::Exhausted { iterations })
    }

    /// Run a tool; any failure becomes text the model can reason over.
    async fn observe(&self, tool: &str, input: &str) -> String {
        match self.tools.call(tool, input).await {
            Ok(text) => text,
            Err(ChatError::ToolNotFound(_)) => format!(
                "{tool} is not a valid tool, try one of [{}].",
                self.tools.names().join(", ")
            ),
            Err(err) => {
                warn!(%tool, error = %err, "tool failed");
                err.to_string()
            }
        }
    }

    fn build_prompt(&self, question: &str, context: &[Turn], steps: &[Step]) -> String {
        let descriptions = self.tools.describe();
        let tool_lines: Vec<String> = descriptions
            .iter()
            .map(|tool| format!("{}: {}", tool.name, tool.description))
            .collect();
        let tool_names: Vec<&str> = descriptions.iter().map(|tool| tool.name.as_str()).collect();

        let mut prompt = String::new();
        prompt.push_str(PREFIX);
        prompt.push_str("\n\n");
        prompt.push_str(&tool_lines.join("\n"));
        prompt.push_str("\n\nUse the following format:\n\n");
        prompt.push_str("Question: the input question you must answer\n");
        prompt.push_str("Thought: you should always think about what to do\n");
        prompt.push_str(&format!(
            "Action: the action to take, should be one of [{}]\n",
            tool_names.join(", ")
        ));
        prompt.push_str("Action Input: the input to the action\n");
        prompt.push_str("Observation: the result of the action\n");
        prompt.push_str(
            "... (this Thought/Action/Action Input/Observation can repeat N times)\n",
        );
        prompt.push_str("Thought: I now know the final answer\n");
        prompt.push_str("Final Answer: the final answer to the original input question\n\n");
        prompt.push_str("Begin!\n\n");

        if !context.is_empty() {
            prompt.push_str("Previous conversation:\n");
            for turn in context {
                let speaker = match turn.role {
                    Speaker::User => "user",
                    Speaker::Assistant => "assistant",
                };
                prompt.push_str(&format!("{speaker}: {}\n", turn.content));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("Question: {question}\nThought:"));
        for step in steps {
            prompt.push_str(&format!(
                "{}\nObservation: {}\nThought:",
                step.log, step.observation
            ));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::conversation::Conversation;
    use crate::llm::ModelCompletion;
    use crate::tool::Tool;
    use crate::StubModel;

    struct Encyclopedia {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Encyclopedia {
        fn name(&self) -> &str {
            "wikipedia"
        }

        fn description(&self) -> &str {
            "Looks things up"
        }

        async fn run(&self, query: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("Page: {query}\nSummary: Paris is the capital of France."))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "Search"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn run(&self, _query: &str) -> Result<String> {
            Err(ChatError::tool(
                "Search",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            ))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<AgentEvent>>,
    }

    #[async_trait]
    impl AgentObserver for Recorder {
        async fn on_event(&self, event: &AgentEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Broken);
        registry.register(Encyclopedia {
            calls: AtomicUsize::new(0),
        });
        Arc::new(registry)
    }

    fn history(question: &str) -> Vec<Turn> {
        let mut conversation = Conversation::new();
        conversation.append(Turn::user(question));
        conversation.all().to_vec()
    }

    fn prompt_text(model: &StubModel, index: usize) -> String {
        model.prompts()[index][0].content.clone()
    }

    #[test]
    fn parses_final_answer() {
        let directive = parse_output(" I now know the final answer\nFinal Answer: Paris").unwrap();
        assert_eq!(
            directive,
            AgentDirective::Finish {
                thought: "I now know the final answer".into(),
                answer: "Paris".into(),
            }
        );
    }

    #[test]
    fn parses_action_and_strips_quotes() {
        let directive = parse_output(
            " I should look this up.\nAction: wikipedia\nAction Input: \"France capital\"\n",
        )
        .unwrap();
        assert_eq!(
            directive,
            AgentDirective::CallTool {
                thought: "I should look this up.".into(),
                tool: "wikipedia".into(),
                input: "France capital".into(),
            }
        );
    }

    #[test]
    fn reports_format_problems() {
        let both = parse_output("Action: Search\nAction Input: x\nFinal Answer: y").unwrap_err();
        assert!(matches!(both, OutputParseError::AnswerAndAction(_)));
        assert_eq!(both.observation(), "Invalid or incomplete response");

        let no_action = parse_output("I am not sure what to do").unwrap_err();
        assert_eq!(
            no_action.observation(),
            "Invalid Format: Missing 'Action:' after 'Thought:'"
        );

        let no_input = parse_output("Action: Search").unwrap_err();
        assert_eq!(
            no_input.observation(),
            "Invalid Format: Missing 'Action Input:' after 'Action:'"
        );
    }

    #[test]
    fn cuts_hallucinated_observations() {
        assert_eq!(
            cut_at_stop("Action: Search\nAction Input: x\nObservation: made up"),
            "Action: Search\nAction Input: x"
        );
        assert_eq!(cut_at_stop("Final Answer: y"), "Final Answer: y");
    }

    #[test]
    fn history_mode_parses_from_text() {
        assert_eq!("full".parse::<HistoryMode>(), Ok(HistoryMode::Full));
        assert_eq!("Last_Turn".parse::<HistoryMode>(), Ok(HistoryMode::LastTurn));
        assert!("all".parse::<HistoryMode>().is_err());
    }

    #[tokio::test]
    async fn answers_directly_without_tools() {
        let model = StubModel::new(vec![
            " I know this.\nFinal Answer: The capital of France is Paris.".into(),
        ]);
        let agent = Agent::new(model.clone(), tools());
        let recorder = Recorder::default();

        let reply = agent
            .respond(&history("What is the capital of France?"), &recorder)
            .await
            .unwrap();

        assert_eq!(reply, AgentReply::Answer("The capital of France is Paris.".into()));
        assert_eq!(recorder.events.lock().unwrap().len(), 1);

        let prompt = prompt_text(&model, 0);
        assert!(prompt.starts_with(PREFIX));
        assert!(prompt.contains("Search: Always fails\nwikipedia: Looks things up"));
        assert!(prompt.contains("should be one of [Search, wikipedia]"));
        assert!(prompt.ends_with("Question: What is the capital of France?\nThought:"));
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let model = StubModel::new(vec![
            " I should look up France.\nAction: wikipedia\nAction Input: France".into(),
            " I now know the final answer\nFinal Answer: Paris".into(),
        ]);
        let agent = Agent::new(model.clone(), tools());
        let recorder = Recorder::default();

        let reply = agent
            .respond(&history("What is the capital of France?"), &recorder)
            .await
            .unwrap();

        assert_eq!(reply.text(), "Paris");
        let second = prompt_text(&model, 1);
        assert!(second.ends_with(
            "Thought: I should look up France.\nAction: wikipedia\nAction Input: France\n\
             Observation: Page: France\nSummary: Paris is the capital of France.\nThought:"
        ));

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            AgentEvent::ToolStep { step: 1, tool, input, .. } if tool == "wikipedia" && input == "France"
        ));
        assert!(matches!(&events[1], AgentEvent::Finish { step: 2, answer, .. } if answer == "Paris"));
    }

    #[tokio::test]
    async fn tool_failures_and_unknown_tools_become_observations() {
        let model = StubModel::new(vec![
            "Action: Search\nAction Input: France".into(),
            "Action: calculator\nAction Input: 2+2".into(),
            "Final Answer: Paris".into(),
        ]);
        let agent = Agent::new(model.clone(), tools());

        let reply = agent
            .respond(&history("capital?"), &crate::hooks::NoopObserver)
            .await
            .unwrap();

        assert_eq!(reply.text(), "Paris");
        let third = prompt_text(&model, 2);
        assert!(third.contains(
            "Observation: tool `Search` invocation failed: connection refused\nThought:"
        ));
        assert!(third.contains(
            "Observation: calculator is not a valid tool, try one of [Search, wikipedia].\nThought:"
        ));
    }

    #[tokio::test]
    async fn recovers_from_malformed_output() {
        let model = StubModel::new(vec![
            "I think I should search".into(),
            "Final Answer: Paris".into(),
        ]);
        let agent = Agent::new(model.clone(), tools());
        let recorder = Recorder::default();

        let reply = agent.respond(&history("capital?"), &recorder).await.unwrap();

        assert_eq!(reply.text(), "Paris");
        assert!(prompt_text(&model, 1).contains(
            "I think I should search\nObservation: Invalid Format: Missing 'Action:' after 'Thought:'"
        ));
        assert!(matches!(
            recorder.events.lock().unwrap()[0],
            AgentEvent::ParseError { step: 1, .. }
        ));
    }

    #[tokio::test]
    async fn stops_at_iteration_limit() {
        let looping = "Action: wikipedia\nAction Input: France".to_string();
        let model = StubModel::new(vec![looping; 10]);
        let agent = Agent::new(model.clone(), tools()).with_max_iterations(3);
        let recorder = Recorder::default();

        let reply = agent.respond(&history("capital?"), &recorder).await.unwrap();

        assert_eq!(reply, AgentReply::Exhausted { iterations: 3 });
        assert_eq!(reply.text(), ITERATION_LIMIT_ANSWER);
        assert_eq!(model.prompts().len(), 3);
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.last(), Some(&AgentEvent::IterationLimit { steps: 3 }));
    }

    #[tokio::test]
    async fn history_mode_controls_context() {
        let mut conversation = Conversation::new();
        conversation.append(Turn::user("Who wrote Attention Is All You Need?"));
        conversation.append(Turn::assistant("Vaswani et al."));
        conversation.append(Turn::user("When was it published?"));

        let model = StubModel::new(vec!["Final Answer: 2017".into(), "Final Answer: 2017".into()]);
        let full = Agent::new(model.clone(), tools());
        let last = Agent::new(model.clone(), tools()).with_history_mode(HistoryMode::LastTurn);

        full.respond(conversation.all(), &crate::hooks::NoopObserver)
            .await
            .unwrap();
        last.respond(conversation.all(), &crate::hooks::NoopObserver)
            .await
            .unwrap();

        let with_context = prompt_text(&model, 0);
        assert!(with_context.contains(
            "Previous conversation:\nassistant: Hi, I'm a chatbot who can search the web. How can I help you?\n\
             user: Who wrote Attention Is All You Need?\nassistant: Vaswani et al.\n\n\
             Question: When was it published?"
        ));
        let without = prompt_text(&model, 1);
        assert!(!without.contains("Previous conversation"));
        assert!(without.contains("Question: When was it published?"));
    }

    #[tokio::test]
    async fn model_errors_abort_the_turn() {
        struct Rejecting;

        #[async_trait]
        impl LanguageModel for Rejecting {
            async fn complete_chat(
                &self,
                _messages: &[Message],
                _options: &CompletionOptions,
            ) -> Result<ModelCompletion> {
                Err(ChatError::Authentication("Invalid API Key".into()))
            }
        }

        let agent = Agent::new(Arc::new(Rejecting), tools());
        let err = agent
            .respond(&history("capital?"), &crate::hooks::NoopObserver)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "authentication");
    }

    #[tokio::test]
    async fn requires_a_user_turn() {
        let model = StubModel::new(vec![]);
        let agent = Agent::new(model, tools());
        let err = agent
            .respond(Conversation::new().all(), &crate::hooks::NoopObserver)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }
}
