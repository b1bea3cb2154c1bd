//! Session manager: per-session serialization around the turn controller

use super::TurnController;
use crate::audit::TurnRecord;
use crate::error::AssistantError;
use crate::models::{LoanApplication, Message, SessionId, SessionState};
use crate::state::SessionStore;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const GREETING: &str = "Hello! I'm your loan assistant. I can help you find the right personal loan. How much would you like to borrow, and what is it for?";

fn greeted_session() -> SessionState {
    let mut state = SessionState::new();
    state.push_message(Message::assistant(GREETING));
    state
}

/// What the caller sees after a turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub reply: String,
    pub application: LoanApplication,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    controller: TurnController,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, controller: TurnController) -> Self {
        Self { store, controller }
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    /// Start a fresh session with the greeting as its first message
    pub async fn create_session(&self) -> Result<TurnReply> {
        let session_id = SessionId::generate();
        let (handle, _) = self.store.get_or_create(&session_id, &greeted_session).await?;
        let application = handle.lock().await.application.clone();

        info!(session_id = %session_id, "Session created");

        Ok(TurnReply {
            session_id,
            reply: GREETING.to_string(),
            application,
        })
    }

    /// Run one turn. Turns for the same session queue on its mutex; the
    /// stored state is only replaced when the turn commits.
    pub async fn handle_message(&self, session_id: &SessionId, message: &str) -> Result<TurnReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AssistantError::InvalidField {
                field: "message",
                reason: "must not be empty".to_string(),
            });
        }

        let (mut guard, created) = loop {
            let (handle, created) = self.store.get_or_create(session_id, &greeted_session).await?;
            let guard = handle.clone().lock_owned().await;
            // The session may have been discarded while this turn waited
            match self.store.get(session_id).await? {
                Some(current) if Arc::ptr_eq(&current, &handle) => break (guard, created),
                _ => continue,
            }
        };
        if created {
            info!(session_id = %session_id, "Session created on first message");
        }

        let result = match self.controller.run_turn(session_id, &guard, message).await {
            Ok(result) => result,
            Err(err) => {
                if created {
                    self.discard(session_id).await;
                }
                return Err(err);
            }
        };
        *guard = result.state;

        Ok(TurnReply {
            session_id: session_id.clone(),
            reply: result.reply,
            application: guard.application.clone(),
        })
    }

    /// Committed state of a session
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<SessionState> {
        let handle = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| AssistantError::SessionNotFound(session_id.to_string()))?;
        let state = handle.lock().await.clone();
        Ok(state)
    }

    /// Remove a session together with its audit records
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        if !self.store.remove(session_id).await? {
            return Err(AssistantError::SessionNotFound(session_id.to_string()));
        }
        let pruned = self.controller.audit_log().remove_session(session_id).await?;
        info!(session_id = %session_id, pruned, "Session deleted");
        Ok(())
    }

    /// Drop a session whose first turn failed, leaving no trace of it
    async fn discard(&self, session_id: &SessionId) {
        let removed = self.store.remove(session_id).await;
        let pruned = self.controller.audit_log().remove_session(session_id).await;
        match (removed, pruned) {
            (Ok(_), Ok(_)) => {
                debug!(session_id = %session_id, "Discarded session after failed first turn")
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(session_id = %session_id, error = %e, "Failed to discard session")
            }
        }
    }

    pub async fn active_sessions(&self) -> Result<Vec<SessionId>> {
        self.store.list().await
    }

    /// Audit records for a session, oldest first
    pub async fn turn_history(&self, session_id: &SessionId) -> Result<Vec<TurnRecord>> {
        self.controller.audit_log().list_for_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::config::TurnSettings;
    use crate::models::{LoanStatus, ToolRequest};
    use crate::policy::ThresholdCreditPolicy;
    use crate::retrieval::InMemoryKnowledgeBase;
    use crate::router::{KeywordRouter, ReasoningRouter, RouterDecision, RoutingRequest};
    use crate::state::InMemorySessionStore;
    use crate::tools::create_default_registry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn manager_with(router: Arc<dyn ReasoningRouter>) -> SessionManager {
        let registry = create_default_registry(
            Arc::new(ThresholdCreditPolicy::default()),
            Arc::new(InMemoryKnowledgeBase::with_loan_products()),
        );
        let controller = TurnController::new(
            router,
            registry,
            TurnSettings::default(),
            Arc::new(AuditLog::new()),
        );
        SessionManager::new(Arc::new(InMemorySessionStore::new()), controller)
    }

    fn manager() -> SessionManager {
        manager_with(Arc::new(KeywordRouter))
    }

    /// Replies to anything except "boom", which starts a tool chain whose
    /// follow-up routing call fails
    struct FlakyRouter;

    #[async_trait]
    impl ReasoningRouter for FlakyRouter {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn route(&self, request: RoutingRequest<'_>) -> Result<RouterDecision> {
            match request.history.last() {
                Some(Message::Human { content }) if content == "boom" => {
                    Ok(RouterDecision::ToolCalls(vec![ToolRequest::new(
                        "update_loan_application_details",
                        json!({"desired_amount": 250000, "purpose": "home"}),
                    )]))
                }
                Some(Message::Tool { .. }) => {
                    Err(AssistantError::RouterError("upstream down".to_string()))
                }
                _ => Ok(RouterDecision::Reply("noted".to_string())),
            }
        }
    }

    /// Counts concurrent calls per session
    struct SlowCountingRouter {
        in_flight: std::sync::atomic::AtomicUsize,
        max_seen: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ReasoningRouter for SlowCountingRouter {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn route(&self, _request: RoutingRequest<'_>) -> Result<RouterDecision> {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(RouterDecision::Reply("ok".to_string()))
        }
    }

    #[tokio::test]
    async fn test_create_session_greets() {
        let manager = manager();
        let reply = manager.create_session().await.unwrap();
        assert_eq!(reply.reply, GREETING);
        assert_eq!(reply.application.status, LoanStatus::CollectingDetails);

        let state = manager.snapshot(&reply.session_id).await.unwrap();
        assert_eq!(state.messages(), &[Message::assistant(GREETING)]);
        assert_eq!(manager.active_sessions().await.unwrap(), vec![reply.session_id]);
    }

    #[tokio::test]
    async fn test_unknown_session_is_created_on_first_message() {
        let manager = manager();
        let id = SessionId::new("client-chosen");

        let reply = manager
            .handle_message(&id, "I need a loan of 100000 for a car.")
            .await
            .unwrap();
        assert_eq!(reply.session_id, id);
        assert_eq!(reply.application.desired_amount, Some(100_000.0));

        let state = manager.snapshot(&id).await.unwrap();
        assert_eq!(state.messages()[0], Message::assistant(GREETING));
        assert_eq!(state.last_reply(), Some(reply.reply.as_str()));
    }

    #[tokio::test]
    async fn test_blank_message_rejected_before_turn() {
        let manager = manager();
        let id = SessionId::new("s");
        let err = manager.handle_message(&id, "   ").await.unwrap_err();
        assert_eq!(err.code(), "invalid_field");
        assert_err!(manager.snapshot(&id).await);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_committed_state() {
        let manager = manager_with(Arc::new(FlakyRouter));
        let id = SessionId::new("s");

        assert_ok!(manager.handle_message(&id, "hello").await);
        let before = manager.snapshot(&id).await.unwrap();

        let err = manager.handle_message(&id, "boom").await.unwrap_err();
        assert_eq!(err.code(), "router_error");

        let after = manager.snapshot(&id).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.application.desired_amount, None);

        let history = manager.turn_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_committed());
        assert!(!history[1].is_committed());
    }

    #[tokio::test]
    async fn test_failed_first_turn_leaves_nothing_behind() {
        let manager = manager_with(Arc::new(FlakyRouter));
        let id = SessionId::new("fresh");

        let err = manager.handle_message(&id, "boom").await.unwrap_err();
        assert_eq!(err.code(), "router_error");

        let err = manager.snapshot(&id).await.unwrap_err();
        assert_eq!(err.code(), "session_not_found");
        assert!(manager.active_sessions().await.unwrap().is_empty());
        assert!(manager.turn_history(&id).await.unwrap().is_empty());

        // The id is usable again afterwards
        let reply = manager.handle_message(&id, "hello").await.unwrap();
        assert_eq!(reply.reply, "noted");
        assert_eq!(manager.turn_history(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let router = Arc::new(SlowCountingRouter {
            in_flight: Default::default(),
            max_seen: Default::default(),
        });
        let manager = Arc::new(manager_with(router.clone()));
        let id = SessionId::new("shared");

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let manager = manager.clone();
                let id = id.clone();
                tokio::spawn(async move { manager.handle_message(&id, &format!("message {}", i)).await })
            })
            .collect();
        for task in tasks {
            assert_ok!(task.await.unwrap());
        }

        assert_eq!(router.max_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        // greeting + 4 * (human + reply)
        assert_eq!(manager.snapshot(&id).await.unwrap().messages().len(), 9);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let manager = manager();
        let created = manager.create_session().await.unwrap();

        assert_ok!(manager.handle_message(&created.session_id, "I need 100000 for a car").await);
        assert_eq!(manager.turn_history(&created.session_id).await.unwrap().len(), 1);

        assert_ok!(manager.delete_session(&created.session_id).await);
        assert!(manager.turn_history(&created.session_id).await.unwrap().is_empty());
        let err = manager.delete_session(&created.session_id).await.unwrap_err();
        assert_eq!(err.code(), "session_not_found");
        assert!(manager.active_sessions().await.unwrap().is_empty());
    }
}
