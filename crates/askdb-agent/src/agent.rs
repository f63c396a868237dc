//! The ReAct reasoning loop

use std::sync::Arc;

use askdb_ai::Completer;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::classify::{Decision, FatalKind, LoopError, RetryPolicy, fatal_message};
use crate::client::{CompletionClient, CompletionOptions};
use crate::events::AgentEvent;
use crate::handle::AgentHandle;
use crate::history::{self, ChatMessage, ContextGuardConfig, ConversationHistory, GuardOutcome};
use crate::parser::{self, ParseError, ParsedStep};
use crate::prompt::{PromptBuilder, PromptContext, PromptStyle};
use crate::registry::ToolRegistry;
use crate::transcript::{ActionStep, FinalStep, RunConfig, RunResult, RunStatus, Step, Transcript};

/// Configuration for the agent
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub run: RunConfig,
    pub context_guard: ContextGuardConfig,
    pub prompt_style: PromptStyle,
    pub completion: CompletionOptions,
}

/// Answers questions by alternating model completions and tool calls.
///
/// Runs on one agent are serialized by `&mut self`; each run gets a fresh
/// transcript and only the conversation history carries over.
pub struct Agent {
    config: AgentConfig,
    registry: ToolRegistry,
    client: CompletionClient,
    prompt: Box<dyn PromptBuilder>,
    history: ConversationHistory,
    event_tx: broadcast::Sender<AgentEvent>,
    handle: AgentHandle,
}

/// How the loop ended, before history bookkeeping
struct LoopOutcome {
    output: String,
    transcript: Transcript,
    status: RunStatus,
    iterations: u32,
    parse_retries: u32,
    fatal: Option<FatalKind>,
}

impl Agent {
    /// Create a new agent
    pub fn new(config: AgentConfig, completer: Arc<dyn Completer>, registry: ToolRegistry) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let prompt = config.prompt_style.builder();
        let client = CompletionClient::new(completer, config.completion.clone());
        Self {
            config,
            registry,
            client,
            prompt,
            history: ConversationHistory::new(),
            event_tx,
            handle: AgentHandle::new(),
        }
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    pub fn model_id(&self) -> &str {
        self.client.model_id()
    }

    pub fn prompt_style(&self) -> PromptStyle {
        self.prompt.style()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Replace the history (e.g. when restoring a saved conversation)
    pub fn set_history(&mut self, history: ConversationHistory) {
        self.history = history;
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Get a cloneable handle for external control
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Abort the current run at the next step boundary
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Answer one question. Always returns a result; failures are reported
    /// through `RunResult::status` with an explanatory `output`.
    pub async fn run(&mut self, query: &str) -> RunResult {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.handle.reset();
        self.handle.set_running(true);

        let _ = self.event_tx.send(AgentEvent::RunStart {
            run_id: run_id.clone(),
            query: query.to_string(),
        });

        let guard = history::guard(&mut self.history, query, &self.config.context_guard);
        match guard {
            GuardOutcome::Trimmed {
                removed,
                chars_before,
                chars_after,
            } => {
                tracing::warn!(
                    "History trimmed: dropped {} messages ({} -> {} chars)",
                    removed,
                    chars_before,
                    chars_after
                );
                let _ = self.event_tx.send(AgentEvent::HistoryTrimmed {
                    removed,
                    chars_after,
                });
            }
            GuardOutcome::Cleared {
                removed,
                chars_before,
            } => {
                tracing::warn!(
                    "History cleared: {} chars exceeded the hard ceiling",
                    chars_before
                );
                let _ = self.event_tx.send(AgentEvent::HistoryCleared {
                    removed,
                    chars_before,
                });
            }
            GuardOutcome::Unchanged => {}
        }

        let outcome = self.reason(query, &cancel).await;

        if outcome.fatal == Some(FatalKind::ContextOverflow) {
            let removed = self.history.len();
            let chars_before = self.history.total_chars();
            self.history.clear();
            let _ = self.event_tx.send(AgentEvent::HistoryCleared {
                removed,
                chars_before,
            });
        }

        self.history.push(ChatMessage::user(query));
        self.history.push(ChatMessage::assistant(outcome.output.clone()));

        tracing::info!(
            status = %outcome.status,
            iterations = outcome.iterations,
            parse_retries = outcome.parse_retries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        let _ = self.event_tx.send(AgentEvent::RunEnd {
            run_id,
            status: outcome.status,
            iterations: outcome.iterations,
        });
        self.handle.set_running(false);

        RunResult {
            output: outcome.output,
            transcript: outcome.transcript,
            status: outcome.status,
            iterations: outcome.iterations,
            parse_retries: outcome.parse_retries,
            elapsed: started.elapsed(),
            history: guard,
        }
    }

    /// THINKING -> ACTING -> OBSERVING until an answer or a failure
    async fn reason(&self, query: &str, cancel: &CancellationToken) -> LoopOutcome {
        let run = &self.config.run;
        let policy = RetryPolicy::new(run.max_retries);
        let started = Instant::now();

        let mut transcript = Transcript::new();
        let mut iteration: u32 = 0;
        let mut retries_used: u32 = 0;
        let mut parse_retries: u32 = 0;
        let mut correction: Option<String> = None;

        let finish = |transcript: Transcript,
                      iterations: u32,
                      parse_retries: u32,
                      status: RunStatus,
                      output: String,
                      fatal: Option<FatalKind>| LoopOutcome {
            output,
            transcript,
            status,
            iterations,
            parse_retries,
            fatal,
        };

        loop {
            // THINKING
            if cancel.is_cancelled() {
                return finish(
                    transcript,
                    iteration,
                    parse_retries,
                    RunStatus::Cancelled,
                    fatal_message(FatalKind::Cancelled, ""),
                    Some(FatalKind::Cancelled),
                );
            }

            if iteration >= run.max_iterations {
                let kind = match policy.classify(&LoopError::IterationsExhausted, retries_used) {
                    Decision::Fatal(kind) => kind,
                    _ => FatalKind::Exhausted,
                };
                let detail = match transcript.last_observation() {
                    Some(obs) => format!("The last result I found was:\n{}", obs),
                    None => "Try asking a narrower question.".to_string(),
                };
                tracing::warn!("Iteration budget of {} exhausted", run.max_iterations);
                return finish(
                    transcript,
                    iteration,
                    parse_retries,
                    kind.status(),
                    fatal_message(kind, &detail),
                    Some(kind),
                );
            }
            iteration += 1;

            if started.elapsed() > run.max_execution_time {
                tracing::warn!(
                    "Execution time budget of {:?} exceeded after {} iterations",
                    run.max_execution_time,
                    iteration - 1
                );
                return finish(
                    transcript,
                    iteration - 1,
                    parse_retries,
                    RunStatus::Timeout,
                    fatal_message(
                        FatalKind::Timeout,
                        &format!("limit of {}s", run.max_execution_time.as_secs()),
                    ),
                    Some(FatalKind::Timeout),
                );
            }

            tracing::debug!(iteration, "requesting completion");
            let _ = self.event_tx.send(AgentEvent::IterationStart { iteration });

            let prompt = self.prompt.build(&PromptContext {
                query,
                tools: &self.registry,
                history: self.history.messages(),
                transcript: &transcript,
                correction: correction.as_deref(),
            });

            let completion = match self
                .client
                .complete(prompt, iteration, &self.event_tx, cancel)
                .await
            {
                Ok(completion) => completion,
                Err(e) => {
                    let kind = match policy.classify(&LoopError::Completion(&e), retries_used) {
                        Decision::Fatal(kind) => kind,
                        _ => FatalKind::ApiError,
                    };
                    tracing::error!("Completion failed: {}", e);
                    return finish(
                        transcript,
                        iteration,
                        parse_retries,
                        kind.status(),
                        fatal_message(kind, &e.to_string()),
                        Some(kind),
                    );
                }
            };

            let parsed = parser::parse(&completion.text).and_then(|step| match step {
                ParsedStep::Action { ref tool, .. } if !self.registry.contains(tool) => {
                    Err(ParseError::UnknownTool {
                        tool: tool.clone(),
                        text: completion.text.clone(),
                    })
                }
                step => Ok(step),
            });

            let (thought, tool, input) = match parsed {
                Ok(ParsedStep::Final { thought, answer }) => {
                    transcript.push(Step::Final(FinalStep {
                        thought,
                        answer: answer.clone(),
                    }));
                    return finish(transcript, iteration, parse_retries, RunStatus::Ok, answer, None);
                }
                Ok(ParsedStep::Action {
                    thought,
                    tool,
                    input,
                }) => (thought, tool, input),
                Err(parse_error) => {
                    if let ParseError::MissingMarkers { ref text } = parse_error {
                        if let Some(answer) = parser::direct_answer(text) {
                            tracing::debug!("Treating unmarked completion as the final answer");
                            transcript.push(Step::Final(FinalStep {
                                thought: String::new(),
                                answer: answer.clone(),
                            }));
                            return finish(
                                transcript,
                                iteration,
                                parse_retries,
                                RunStatus::Ok,
                                answer,
                                None,
                            );
                        }
                    }

                    match policy.classify(&LoopError::Parse(&parse_error), retries_used) {
                        Decision::Retry => {
                            retries_used += 1;
                            parse_retries += 1;
                            tracing::warn!(
                                "Malformed completion (retry {}/{}): {}",
                                retries_used,
                                policy.max_retries(),
                                parse_error
                            );
                            let _ = self.event_tx.send(AgentEvent::ParseRetry {
                                attempt: retries_used,
                                reason: parse_error.to_string(),
                            });
                            correction = Some(parse_error.correction(&self.registry.names()));
                            continue;
                        }
                        Decision::SynthesizeAnswer(text) => {
                            tracing::warn!("Giving up after {} malformed completions", retries_used + 1);
                            return finish(
                                transcript,
                                iteration,
                                parse_retries,
                                RunStatus::ParseError,
                                text,
                                None,
                            );
                        }
                        Decision::Observe(_) | Decision::Fatal(_) => {
                            return finish(
                                transcript,
                                iteration,
                                parse_retries,
                                RunStatus::ParseError,
                                crate::classify::PARSE_FAILURE_ANSWER.to_string(),
                                None,
                            );
                        }
                    }
                }
            };
            retries_used = 0;
            correction = None;

            // ACTING
            let _ = self.event_tx.send(AgentEvent::ToolStart {
                iteration,
                tool_name: tool.clone(),
                tool_input: input.clone(),
            });
            tracing::debug!(tool = %tool, "invoking tool");

            let mut fatal = None;
            let (observation, artifacts, is_error) = match self.registry.invoke(&tool, &input).await {
                Ok(output) => (output.text, output.artifacts, false),
                Err(e) => match policy.classify(&LoopError::Tool(&e), retries_used) {
                    Decision::Fatal(kind) => {
                        fatal = Some((kind, e.to_string()));
                        (e.to_string(), Vec::new(), true)
                    }
                    Decision::Observe(text) => (text, Vec::new(), true),
                    Decision::Retry | Decision::SynthesizeAnswer(_) => (e.to_string(), Vec::new(), true),
                },
            };

            let _ = self.event_tx.send(AgentEvent::ToolEnd {
                iteration,
                tool_name: tool.clone(),
                observation: observation.clone(),
                is_error,
            });

            // OBSERVING
            transcript.push(Step::Action(ActionStep {
                thought,
                tool_name: tool,
                tool_input: input,
                observation,
                artifacts,
                is_error,
            }));

            if let Some((kind, detail)) = fatal {
                tracing::error!("Tool failure ended the run: {}", detail);
                return finish(
                    transcript,
                    iteration,
                    parse_retries,
                    kind.status(),
                    fatal_message(kind, &detail),
                    Some(kind),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedCompleter, StubTool};
    use crate::tool::ToolError;
    use std::time::Duration;

    const COUNT_ACTION: &str =
        "I should count the users.\nAction: sql_db_query\nAction Input: SELECT COUNT(*) FROM users";

    fn make_agent(completer: Arc<ScriptedCompleter>, tools: Vec<Arc<StubTool>>, run: RunConfig) -> Agent {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        let config = AgentConfig {
            run,
            ..AgentConfig::default()
        };
        Agent::new(config, completer, registry)
    }

    #[tokio::test]
    async fn test_count_users_scenario() {
        let completer = ScriptedCompleter::texts(&[
            COUNT_ACTION,
            "I now know the final answer\nFinal Answer: 3",
        ]);
        let query_tool = StubTool::ok("sql_db_query", "3");
        let mut agent = make_agent(completer.clone(), vec![query_tool.clone()], RunConfig::default());

        let result = agent.run("How many users are there?").await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.output, "3");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.parse_retries, 0);
        assert_eq!(query_tool.inputs(), vec!["SELECT COUNT(*) FROM users"]);

        let steps = result.transcript.steps();
        assert_eq!(steps.len(), 2);
        match &steps[0] {
            Step::Action(a) => {
                assert_eq!(a.thought, "I should count the users.");
                assert_eq!(a.tool_name, "sql_db_query");
                assert_eq!(a.observation, "3");
                assert!(!a.is_error);
            }
            other => panic!("expected action, got {:?}", other),
        }
        assert!(matches!(&steps[1], Step::Final(f) if f.answer == "3"));

        let prompts = completer.prompts();
        assert!(prompts[1].ends_with("Observation: 3\nThought:"));

        let history = agent.history().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, crate::history::Role::User);
        assert_eq!(history[0].content, "How many users are there?");
        assert_eq!(history[1].content, "3");
    }

    #[tokio::test]
    async fn test_action_wins_over_final_answer() {
        let completer = ScriptedCompleter::texts(&[
            "Action: sql_db_query\nAction Input: SELECT COUNT(*) FROM users\nFinal Answer: 42",
            "Final Answer: 3",
        ]);
        let tool = StubTool::ok("sql_db_query", "3");
        let mut agent = make_agent(completer, vec![tool.clone()], RunConfig::default());

        let result = agent.run("How many users?").await;

        assert_eq!(tool.calls(), 1);
        assert_eq!(result.output, "3");
        assert!(matches!(result.transcript.steps()[0], Step::Action(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool_retried_with_correction() {
        let completer = ScriptedCompleter::texts(&[
            "Action: run_sql\nAction Input: SELECT COUNT(*) FROM users",
            COUNT_ACTION,
            "Final Answer: 3",
        ]);
        let tool = StubTool::ok("sql_db_query", "3");
        let mut agent = make_agent(completer.clone(), vec![tool.clone()], RunConfig::default());

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.parse_retries, 1);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.transcript.action_steps().count(), 1);
        assert_eq!(tool.calls(), 1);

        let prompts = completer.prompts();
        assert!(!prompts[0].contains("is not a valid tool"));
        assert!(prompts[1].contains("`run_sql` is not a valid tool"));
        assert!(!prompts[2].contains("is not a valid tool"));
    }

    #[tokio::test]
    async fn test_tool_names_are_case_sensitive() {
        let completer = ScriptedCompleter::texts(&[
            "Action: SQL_DB_QUERY\nAction Input: SELECT 1",
            "Final Answer: 1",
        ]);
        let tool = StubTool::ok("sql_db_query", "1");
        let mut agent = make_agent(completer, vec![tool.clone()], RunConfig::default());

        let result = agent.run("q").await;
        assert_eq!(tool.calls(), 0);
        assert_eq!(result.parse_retries, 1);
    }

    #[tokio::test]
    async fn test_auth_error_is_fatal_without_retry() {
        let completer = ScriptedCompleter::new(vec![Reply::Fail(|| {
            askdb_ai::Error::Auth("Incorrect API key provided".into())
        })]);
        let mut agent = make_agent(completer.clone(), vec![StubTool::ok("sql_db_query", "3")], RunConfig::default());

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::ApiError);
        assert!(result.output.contains("Please check your API key and model configuration."));
        assert_eq!(completer.calls(), 1);
        assert!(result.transcript.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failures_bounded_by_max_retries() {
        let completer = ScriptedCompleter::texts(&[
            "I will look at the users table.",
            "I need to check the schema.",
            "Let me query it.",
            "Final Answer: never reached",
        ]);
        let mut agent = make_agent(completer.clone(), vec![StubTool::ok("sql_db_query", "3")], RunConfig::default());

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::ParseError);
        assert_eq!(result.output, crate::classify::PARSE_FAILURE_ANSWER);
        assert_eq!(result.parse_retries, 2);
        assert_eq!(completer.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_resets_after_good_step() {
        let completer = ScriptedCompleter::texts(&[
            "I will look first.",
            COUNT_ACTION,
            "I will double check.",
            "Final Answer: 3",
        ]);
        let run = RunConfig {
            max_retries: 1,
            ..RunConfig::default()
        };
        let mut agent = make_agent(completer, vec![StubTool::ok("sql_db_query", "3")], run);

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.parse_retries, 2);
    }

    #[tokio::test]
    async fn test_unmarked_direct_answer_accepted() {
        let completer = ScriptedCompleter::texts(&["There are 3 users in the database."]);
        let mut agent = make_agent(completer.clone(), vec![StubTool::ok("sql_db_query", "3")], RunConfig::default());

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.output, "There are 3 users in the database.");
        assert_eq!(result.parse_retries, 0);
        assert_eq!(completer.calls(), 1);
    }

    #[tokio::test]
    async fn test_iteration_budget() {
        let completer = ScriptedCompleter::texts(&[COUNT_ACTION, COUNT_ACTION, COUNT_ACTION]);
        let run = RunConfig {
            max_iterations: 2,
            ..RunConfig::default()
        };
        let mut agent = make_agent(completer.clone(), vec![StubTool::ok("sql_db_query", "3")], run);

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(completer.calls(), 2);
        assert_eq!(result.iterations, 2);
        assert!(result.output.contains("The last result I found was:\n3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_time_budget() {
        let completer = ScriptedCompleter::texts(&[COUNT_ACTION, "Final Answer: 3"]);
        let run = RunConfig {
            max_execution_time: Duration::from_secs(1),
            ..RunConfig::default()
        };
        let slow = StubTool::slow("sql_db_query", "3", Duration::from_secs(5));
        let mut agent = make_agent(completer.clone(), vec![slow.clone()], run);

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(completer.calls(), 1);
        assert_eq!(slow.calls(), 1);
        // The in-flight tool call completed and was recorded
        assert_eq!(result.transcript.action_steps().count(), 1);
    }

    #[tokio::test]
    async fn test_tool_error_becomes_observation() {
        let completer = ScriptedCompleter::texts(&[
            "Action: sql_db_query\nAction Input: SELECT nme FROM users",
            "Final Answer: sorry",
        ]);
        let tool = StubTool::err("sql_db_query", ToolError::failed("no such column: nme"));
        let mut agent = make_agent(completer.clone(), vec![tool], RunConfig::default());

        let result = agent.run("names?").await;

        assert_eq!(result.status, RunStatus::Ok);
        let step = result.transcript.action_steps().next().unwrap();
        assert_eq!(step.observation, "Error: no such column: nme");
        assert!(step.is_error);
        assert!(completer.prompts()[1].contains("Observation: Error: no such column: nme"));
    }

    #[tokio::test]
    async fn test_tool_timeout_is_fatal() {
        let completer = ScriptedCompleter::texts(&[COUNT_ACTION, "Final Answer: 3"]);
        let tool = StubTool::err("sql_db_query", ToolError::failed("Query timed out after 30s"));
        let mut agent = make_agent(completer.clone(), vec![tool], RunConfig::default());

        let result = agent.run("How many users?").await;

        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(completer.calls(), 1);
        assert_eq!(result.transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_history_trimmed_before_run() {
        let completer = ScriptedCompleter::texts(&["Final Answer: ok"]);
        let mut agent = make_agent(completer.clone(), vec![], RunConfig::default());
        let messages = (0..10)
            .map(|i| {
                let body = format!("{}{}", i, "x".repeat(2_499));
                if i % 2 == 0 {
                    ChatMessage::user(body)
                } else {
                    ChatMessage::assistant(body)
                }
            })
            .collect();
        agent.set_history(ConversationHistory::from_messages(messages));

        let result = agent.run("next?").await;

        assert!(matches!(result.history, GuardOutcome::Trimmed { removed: 6, .. }));
        let prompt = &completer.prompts()[0];
        assert!(!prompt.contains("5xxx"));
        assert!(prompt.contains("6xxx"));
        assert_eq!(agent.history().len(), 6);
    }

    #[tokio::test]
    async fn test_context_overflow_clears_history() {
        let completer = ScriptedCompleter::new(vec![Reply::Fail(|| {
            askdb_ai::Error::api(
                "invalid_request_error",
                "This model's maximum context length is 16385 tokens",
            )
        })]);
        let mut agent = make_agent(completer, vec![], RunConfig::default());
        agent.set_history(ConversationHistory::from_messages(vec![
            ChatMessage::user("earlier"),
            ChatMessage::assistant("answer"),
        ]));

        let result = agent.run("again").await;

        assert_eq!(result.status, RunStatus::ApiError);
        assert!(result.output.contains("history has been cleared"));
        assert!(result.output.ends_with("Please check your API key and model configuration."));
        let history = agent.history().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "again");
    }

    #[tokio::test]
    async fn test_no_transcript_leakage_between_runs() {
        let completer = ScriptedCompleter::texts(&[COUNT_ACTION, "Final Answer: 3", "Final Answer: 2"]);
        let mut agent = make_agent(completer.clone(), vec![StubTool::ok("sql_db_query", "3")], RunConfig::default());

        let first = agent.run("How many users?").await;
        let second = agent.run("How many orders?").await;

        assert_eq!(first.transcript.len(), 2);
        assert_eq!(second.transcript.len(), 1);
        let prompt = &completer.prompts()[2];
        assert!(prompt.contains("Previous conversation:\nUser: How many users?\nAssistant: 3\n"));
        assert!(prompt.ends_with("Question: How many orders?\nThought:"));
    }

    #[tokio::test]
    async fn test_abort_stops_at_next_step() {
        let completer = ScriptedCompleter::texts(&[COUNT_ACTION, "Final Answer: 3"]);
        let slow = StubTool::slow("sql_db_query", "3", Duration::from_millis(50));
        let mut agent = make_agent(completer.clone(), vec![slow], RunConfig::default());
        let handle = agent.handle();

        let aborter = tokio::spawn(async move {
            while !handle.is_running() {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.abort();
        });

        let result = agent.run("How many users?").await;
        aborter.await.unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(completer.calls(), 1);
        assert_eq!(result.transcript.len(), 1);
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let completer = ScriptedCompleter::texts(&[COUNT_ACTION, "Final Answer: 3"]);
        let mut agent = make_agent(completer, vec![StubTool::ok("sql_db_query", "3")], RunConfig::default());
        let mut rx = agent.subscribe();

        agent.run("How many users?").await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let kind = serde_json::to_value(&event).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string();
            kinds.push(kind);
            if event.is_terminal() {
                break;
            }
        }
        assert_eq!(
            kinds,
            vec![
                "run_start",
                "iteration_start",
                "completion_delta",
                "tool_start",
                "tool_end",
                "iteration_start",
                "completion_delta",
                "run_end",
            ]
        );
    }
}
