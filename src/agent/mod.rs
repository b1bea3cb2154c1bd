//! Dialogue turn controller
//!
//! HUMAN → ROUTE → [TOOLS → ROUTE]* → REPLY
//!
//! A turn runs on a private copy of the committed session. The copy is only
//! handed back once the router produces a plain reply; any fatal error drops
//! it, so the caller's committed state is what the next turn sees.

pub mod session;

pub use session::{SessionManager, TurnReply, GREETING};

use crate::audit::{AuditLog, TurnOutcome, TurnRecord};
use crate::config::TurnSettings;
use crate::error::AssistantError;
use crate::models::{Message, SessionId, SessionState, ToolRequest};
use crate::router::{ReasoningRouter, RouterDecision, RoutingRequest};
use crate::tools::{ToolOutput, ToolRegistry};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A committed turn
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub turn_id: Uuid,
    pub state: SessionState,
    pub reply: String,
    pub iterations: u32,
    pub tools_invoked: Vec<String>,
}

/// Serialized tool result as the router sees it
fn tool_message(request: &ToolRequest, result: &Result<ToolOutput>) -> Message {
    let (content, is_error) = match result {
        Ok(output) => (
            json!({ "ok": true, "summary": output.summary, "data": output.data }),
            false,
        ),
        Err(err) => (
            json!({ "ok": false, "error": err.code(), "message": err.to_string() }),
            true,
        ),
    };
    Message::Tool {
        name: request.name.clone(),
        content: content.to_string(),
        is_error,
    }
}

pub struct TurnController {
    router: Arc<dyn ReasoningRouter>,
    registry: ToolRegistry,
    settings: TurnSettings,
    audit_log: Arc<AuditLog>,
}

impl TurnController {
    pub fn new(
        router: Arc<dyn ReasoningRouter>,
        registry: ToolRegistry,
        settings: TurnSettings,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        Self {
            router,
            registry,
            settings,
            audit_log,
        }
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit_log
    }

    pub fn router_name(&self) -> &'static str {
        self.router.name()
    }

    /// Process one incoming message against the committed session.
    ///
    /// On `Err` nothing from this turn survives except its audit record.
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        committed: &SessionState,
        message: &str,
    ) -> Result<TurnResult> {
        let start_time = Instant::now();
        let mut state = committed.clone();
        let mut iterations = 0;
        let mut tools_invoked = Vec::new();

        info!(
            session_id = %session_id,
            router = self.router.name(),
            status = %state.application.status,
            "Turn started"
        );

        let outcome = self
            .drive(&mut state, message, &mut iterations, &mut tools_invoked)
            .await;

        match outcome {
            Ok(reply) => {
                let record = TurnRecord::new(
                    session_id.clone(),
                    TurnOutcome::Committed,
                    iterations,
                    tools_invoked.clone(),
                    &state.application,
                );
                let turn_id = self.audit_log.record(record).await?;

                info!(
                    session_id = %session_id,
                    %turn_id,
                    iterations,
                    status = %state.application.status,
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "Turn committed"
                );

                Ok(TurnResult {
                    turn_id,
                    state,
                    reply,
                    iterations,
                    tools_invoked,
                })
            }
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    iterations,
                    error = %err,
                    "Turn rolled back"
                );

                let record = TurnRecord::new(
                    session_id.clone(),
                    TurnOutcome::RolledBack {
                        reason: err.to_string(),
                    },
                    iterations,
                    tools_invoked,
                    &committed.application,
                );
                self.audit_log.record(record).await?;

                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        state: &mut SessionState,
        message: &str,
        iterations: &mut u32,
        tools_invoked: &mut Vec<String>,
    ) -> Result<String> {
        state.push_message(Message::human(message));
        let catalog = self.registry.catalog();

        loop {
            let request = RoutingRequest {
                history: state.messages(),
                application: &state.application,
                catalog: &catalog,
            };

            let decision = tokio::time::timeout(self.settings.router_timeout, self.router.route(request))
                .await
                .map_err(|_| AssistantError::Timeout {
                    operation: "reasoning router",
                    seconds: self.settings.router_timeout.as_secs(),
                })??;

            let calls = match decision {
                RouterDecision::Reply(reply) => {
                    state.push_message(Message::assistant(reply.clone()));
                    return Ok(reply);
                }
                RouterDecision::ToolCalls(calls) if calls.is_empty() => {
                    return Err(AssistantError::RouterError(
                        "router requested an empty tool call list".to_string(),
                    ));
                }
                RouterDecision::ToolCalls(calls) => calls,
            };

            if *iterations >= self.settings.max_chain_iterations {
                return Err(AssistantError::ChainLimitExceeded(self.settings.max_chain_iterations));
            }
            *iterations += 1;

            debug!(
                iteration = *iterations,
                calls = calls.len(),
                "Router requested tools"
            );

            state.push_message(Message::Assistant {
                content: String::new(),
                tool_calls: calls.clone(),
            });

            for request in &calls {
                let result = match self.registry.resolve(request) {
                    Ok(call) => self.registry.dispatch(state, &call).await,
                    Err(err) => Err(err),
                };

                let result = match result {
                    Err(err) if !err.is_recoverable() => return Err(err),
                    Err(err) => {
                        debug!(tool = %request.name, code = err.code(), "Recoverable tool error");
                        Err(err)
                    }
                    ok => ok,
                };

                tools_invoked.push(request.name.clone());
                state.push_message(tool_message(request, &result));
            }
        }
    }
}
