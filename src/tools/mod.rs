//! Tool catalog, typed tool calls and the registry that dispatches them
//!
//! Handlers are deterministic state transitions over the loan application.
//! Each handler validates before mutating, so a rejected call leaves the
//! application untouched.

pub mod credit;
pub mod details;
pub mod kyc;
pub mod retrieval;
pub mod sanction;

pub use credit::evaluate_credit;
pub use details::{update_details, DetailUpdate};
pub use kyc::verify_kyc;
pub use retrieval::retrieve_context;
pub use sanction::generate_sanction_letter;

use crate::error::AssistantError;
use crate::models::{SessionState, ToolRequest};
use crate::policy::CreditPolicy;
use crate::retrieval::RetrievalConnector;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    UpdateLoanApplicationDetails,
    VerifyKyc,
    EvaluateCreditworthiness,
    RetrieveContext,
    GenerateLoanSanctionLetter,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::UpdateLoanApplicationDetails,
        ToolKind::VerifyKyc,
        ToolKind::EvaluateCreditworthiness,
        ToolKind::RetrieveContext,
        ToolKind::GenerateLoanSanctionLetter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::UpdateLoanApplicationDetails => "update_loan_application_details",
            ToolKind::VerifyKyc => "verify_kyc",
            ToolKind::EvaluateCreditworthiness => "evaluate_creditworthiness",
            ToolKind::RetrieveContext => "retrieve_context",
            ToolKind::GenerateLoanSanctionLetter => "generate_loan_sanction_letter",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::UpdateLoanApplicationDetails => {
                "Record any of the applicant's name, desired loan amount, loan term in months and loan purpose. Only supplied fields change."
            }
            ToolKind::VerifyKyc => {
                "Verify the applicant's identity by confirming their full name against the name on the application."
            }
            ToolKind::EvaluateCreditworthiness => {
                "Run the credit check for the requested loan amount and record the eligibility verdict and offer."
            }
            ToolKind::RetrieveContext => {
                "Look up loan product information, eligibility rules, KYC documents or the sanction process."
            }
            ToolKind::GenerateLoanSanctionLetter => {
                "Issue the loan sanction letter once KYC is verified and the applicant is credit eligible."
            }
        }
    }

    /// JSON schema for the arguments object
    pub fn parameters(&self) -> Value {
        match self {
            ToolKind::UpdateLoanApplicationDetails => json!({
                "type": "object",
                "properties": {
                    "applicant_name": { "type": "string", "description": "Full name of the applicant" },
                    "desired_amount": { "type": "number", "description": "Requested loan amount" },
                    "loan_term_months": { "type": "integer", "description": "Repayment term in months" },
                    "purpose": { "type": "string", "description": "What the loan is for" }
                }
            }),
            ToolKind::VerifyKyc => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Full name as stated by the applicant" }
                },
                "required": ["name"]
            }),
            ToolKind::EvaluateCreditworthiness => json!({
                "type": "object",
                "properties": {
                    "amount": { "type": "number", "description": "Loan amount to evaluate" }
                },
                "required": ["amount"]
            }),
            ToolKind::RetrieveContext => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Question to look up" }
                },
                "required": ["query"]
            }),
            ToolKind::GenerateLoanSanctionLetter => json!({
                "type": "object",
                "properties": {}
            }),
        }
    }
}

/// Catalog entry handed to the reasoning router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<ToolKind> for ToolSpec {
    fn from(kind: ToolKind) -> Self {
        Self {
            name: kind.name().to_string(),
            description: kind.description().to_string(),
            parameters: kind.parameters(),
        }
    }
}

/// A resolved tool invocation with checked argument shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    UpdateDetails(DetailUpdate),
    VerifyKyc { name: String },
    EvaluateCredit { amount: f64 },
    RetrieveContext { query: String },
    GenerateSanctionLetter,
}

#[derive(Deserialize)]
struct KycArgs {
    #[serde(alias = "applicant_name")]
    name: String,
}

#[derive(Deserialize)]
struct CreditArgs {
    #[serde(alias = "desired_amount")]
    amount: f64,
}

#[derive(Deserialize)]
struct RetrievalArgs {
    query: String,
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::UpdateDetails(_) => ToolKind::UpdateLoanApplicationDetails,
            ToolCall::VerifyKyc { .. } => ToolKind::VerifyKyc,
            ToolCall::EvaluateCredit { .. } => ToolKind::EvaluateCreditworthiness,
            ToolCall::RetrieveContext { .. } => ToolKind::RetrieveContext,
            ToolCall::GenerateSanctionLetter => ToolKind::GenerateLoanSanctionLetter,
        }
    }

    fn parse(kind: ToolKind, arguments: &Value) -> Result<Self> {
        let args = if arguments.is_null() {
            json!({})
        } else {
            arguments.clone()
        };
        if !args.is_object() {
            return Err(AssistantError::InvalidToolInput {
                tool: kind.name().to_string(),
                reason: "arguments must be a JSON object".to_string(),
            });
        }

        let invalid = |e: serde_json::Error| AssistantError::InvalidToolInput {
            tool: kind.name().to_string(),
            reason: e.to_string(),
        };

        let call = match kind {
            ToolKind::UpdateLoanApplicationDetails => {
                ToolCall::UpdateDetails(serde_json::from_value(args).map_err(invalid)?)
            }
            ToolKind::VerifyKyc => {
                let KycArgs { name } = serde_json::from_value(args).map_err(invalid)?;
                ToolCall::VerifyKyc { name }
            }
            ToolKind::EvaluateCreditworthiness => {
                let CreditArgs { amount } = serde_json::from_value(args).map_err(invalid)?;
                ToolCall::EvaluateCredit { amount }
            }
            ToolKind::RetrieveContext => {
                let RetrievalArgs { query } = serde_json::from_value(args).map_err(invalid)?;
                ToolCall::RetrieveContext { query }
            }
            ToolKind::GenerateLoanSanctionLetter => ToolCall::GenerateSanctionLetter,
        };
        Ok(call)
    }
}

/// Result of a successful handler run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Value,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
        }
    }
}

/// Registry of enabled tools plus the collaborators they need
pub struct ToolRegistry {
    enabled: Vec<ToolKind>,
    credit_policy: Arc<dyn CreditPolicy>,
    retrieval: Arc<dyn RetrievalConnector>,
    retrieval_top_k: usize,
    retrieval_timeout: Duration,
}

impl ToolRegistry {
    /// Empty registry; tools must be registered explicitly
    pub fn new(
        credit_policy: Arc<dyn CreditPolicy>,
        retrieval: Arc<dyn RetrievalConnector>,
    ) -> Self {
        Self {
            enabled: Vec::new(),
            credit_policy,
            retrieval,
            retrieval_top_k: 1,
            retrieval_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_retrieval_limits(mut self, top_k: usize, timeout: Duration) -> Self {
        self.retrieval_top_k = top_k.max(1);
        self.retrieval_timeout = timeout;
        self
    }

    pub fn register(&mut self, kind: ToolKind) {
        if !self.enabled.contains(&kind) {
            self.enabled.push(kind);
        }
    }

    pub fn is_registered(&self, kind: ToolKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.enabled.iter().copied().map(ToolSpec::from).collect()
    }

    /// Turn a router request into a typed call against the registered set
    pub fn resolve(&self, request: &ToolRequest) -> Result<ToolCall> {
        let kind = ToolKind::from_name(&request.name)
            .filter(|kind| self.is_registered(*kind))
            .ok_or_else(|| AssistantError::UnknownTool(request.name.clone()))?;
        ToolCall::parse(kind, &request.arguments)
    }

    /// Apply one call to the session. On error the session is unchanged.
    pub async fn dispatch(&self, state: &mut SessionState, call: &ToolCall) -> Result<ToolOutput> {
        debug!(tool = call.kind().name(), "Dispatching tool");

        match call {
            ToolCall::UpdateDetails(update) => update_details(&mut state.application, update),
            ToolCall::VerifyKyc { name } => verify_kyc(&mut state.application, name),
            ToolCall::EvaluateCredit { amount } => {
                evaluate_credit(&mut state.application, *amount, self.credit_policy.as_ref())
            }
            ToolCall::RetrieveContext { query } => {
                let document = retrieve_context(
                    self.retrieval.as_ref(),
                    query,
                    self.retrieval_top_k,
                    self.retrieval_timeout,
                )
                .await?;
                let summary = if document.is_empty() {
                    "No matching information found.".to_string()
                } else {
                    document.clone()
                };
                Ok(ToolOutput::new(summary, json!({ "query": query, "document": document })))
            }
            ToolCall::GenerateSanctionLetter => generate_sanction_letter(&mut state.application),
        }
    }
}

/// Registry with every loan tool registered
pub fn create_default_registry(
    credit_policy: Arc<dyn CreditPolicy>,
    retrieval: Arc<dyn RetrievalConnector>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new(credit_policy, retrieval);
    for kind in ToolKind::ALL {
        registry.register(kind);
    }
    registry
}
