//! Reasoning router: decides between replying and invoking tools
//!
//! The router only proposes. Tool requests are resolved and executed by the
//! turn controller, never by the router itself.

use crate::models::{LoanApplication, Message, ToolRequest};
use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod gemini;
pub mod keyword;

pub use gemini::GeminiRouter;
pub use keyword::KeywordRouter;

/// Everything the router may look at for one decision
#[derive(Debug, Clone, Copy)]
pub struct RoutingRequest<'a> {
    pub history: &'a [Message],
    pub application: &'a LoanApplication,
    pub catalog: &'a [ToolSpec],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterDecision {
    Reply(String),
    ToolCalls(Vec<ToolRequest>),
}

#[async_trait]
pub trait ReasoningRouter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn route(&self, request: RoutingRequest<'_>) -> Result<RouterDecision>;
}
