//! Gemini-backed reasoning router
//!
//! Sends a windowed slice of the dialogue plus the tool catalog and maps the
//! model's function calls back onto tool requests.

use super::{ReasoningRouter, RouterDecision, RoutingRequest};
use crate::config::LlmSettings;
use crate::error::AssistantError;
use crate::gemini::{Content, FunctionCall, FunctionResponse, GeminiClient, Part};
use crate::models::{LoanApplication, Message, ToolRequest};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub struct GeminiRouter {
    client: GeminiClient,
    history_window: usize,
}

impl GeminiRouter {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(settings)?,
            history_window: settings.history_window.max(1),
        })
    }

    pub fn from_client(client: GeminiClient, history_window: usize) -> Self {
        Self {
            client,
            history_window: history_window.max(1),
        }
    }
}

fn or_not_provided<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "not provided".to_string())
}

pub fn build_system_prompt(app: &LoanApplication) -> String {
    format!(
        r#"You are a friendly loan sales assistant for a retail lender.

Guide the customer through a personal loan application:
1. Collect the desired amount, the purpose, an optional term in months and the applicant's full name.
2. Verify identity (KYC) once the customer agrees.
3. Run a credit check once the customer agrees.
4. If eligible, present the offer and issue a sanction letter only after the customer accepts.

Rules:
- Use the provided tools to record details and perform checks. Never invent results.
- Use retrieve_context to answer questions about loan products, rates or documents.
- Ask for one missing piece of information at a time.
- Keep replies short and professional.

Current application status:
- Applicant name: {name}
- Desired amount: {amount}
- Loan term (months): {term}
- Purpose: {purpose}
- Status: {status}
- KYC verified: {kyc}
- Credit eligibility: {eligibility}
- Offered amount: {offer}
- Offered interest rate: {rate}
- Sanction letter generated: {letter}"#,
        name = or_not_provided(app.applicant_name.as_deref()),
        amount = or_not_provided(app.desired_amount),
        term = or_not_provided(app.loan_term_months),
        purpose = or_not_provided(app.purpose.as_deref()),
        status = app.status,
        kyc = app.kyc_verified,
        eligibility = app.credit_eligibility,
        offer = or_not_provided(app.offered_amount),
        rate = or_not_provided(app.offered_interest_rate),
        letter = app.sanction_letter_generated,
    )
}

/// Last `window` messages, trimmed so the slice opens on a human turn.
/// Function responses must follow their calls, so a window never starts
/// mid-exchange.
pub fn windowed(history: &[Message], window: usize) -> &[Message] {
    let start = history.len().saturating_sub(window);
    let slice = &history[start..];
    match slice.iter().position(|m| matches!(m, Message::Human { .. })) {
        Some(first_human) => &slice[first_human..],
        None => {
            // Window holds only a tool exchange; extend back to its human turn
            let anchor = history[..start]
                .iter()
                .rposition(|m| matches!(m, Message::Human { .. }))
                .unwrap_or(0);
            &history[anchor..]
        }
    }
}

fn to_part(message: &Message) -> (&'static str, Vec<Part>) {
    match message {
        Message::Human { content } => ("user", vec![Part::text(content.clone())]),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut parts = Vec::new();
            if !content.is_empty() {
                parts.push(Part::text(content.clone()));
            }
            parts.extend(tool_calls.iter().map(|call| Part {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..Part::default()
            }));
            ("model", parts)
        }
        Message::Tool { name, content, .. } => {
            let response = serde_json::from_str::<Value>(content)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({ "content": content }));
            (
                "user",
                vec![Part {
                    function_response: Some(FunctionResponse {
                        name: name.clone(),
                        response,
                    }),
                    ..Part::default()
                }],
            )
        }
    }
}

/// Convert dialogue messages to Gemini contents, merging consecutive
/// messages that share a role
pub fn to_contents(history: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();
    for message in history {
        let (role, parts) = to_part(message);
        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
            _ => contents.push(Content {
                role: Some(role.to_string()),
                parts,
            }),
        }
    }
    contents
}

fn decide(parts: &[Part]) -> Result<RouterDecision> {
    let calls: Vec<ToolRequest> = parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .map(|call| ToolRequest::new(call.name.clone(), call.args.clone()))
        .collect();
    if !calls.is_empty() {
        return Ok(RouterDecision::ToolCalls(calls));
    }

    let text: Vec<&str> = parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if text.is_empty() {
        return Err(AssistantError::RouterError(
            "Gemini returned neither text nor function calls".to_string(),
        ));
    }
    Ok(RouterDecision::Reply(text.join("\n")))
}

#[async_trait]
impl ReasoningRouter for GeminiRouter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn route(&self, request: RoutingRequest<'_>) -> Result<RouterDecision> {
        let history = windowed(request.history, self.history_window);
        let system_prompt = build_system_prompt(request.application);
        let body = self
            .client
            .build_request(&system_prompt, to_contents(history), request.catalog);

        debug!(
            model = %self.client.model(),
            messages = history.len(),
            "Routing turn through Gemini"
        );

        let response = self.client.generate(&body).await?;
        decide(response.first_parts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanStatus;

    fn tool_message(name: &str, content: &str) -> Message {
        Message::Tool {
            name: name.to_string(),
            content: content.to_string(),
            is_error: false,
        }
    }

    #[test]
    fn test_system_prompt_reflects_application() {
        let app = LoanApplication {
            applicant_name: Some("John Doe".to_string()),
            desired_amount: Some(100_000.0),
            status: LoanStatus::KycPending,
            ..LoanApplication::default()
        };
        let prompt = build_system_prompt(&app);
        assert!(prompt.contains("Applicant name: John Doe"));
        assert!(prompt.contains("Desired amount: 100000"));
        assert!(prompt.contains("Purpose: not provided"));
        assert!(prompt.contains("Status: kyc_pending"));
    }

    #[test]
    fn test_window_starts_on_human_turn() {
        let history = vec![
            Message::human("I need 100000 for a car"),
            Message::Assistant {
                content: String::new(),
                tool_calls: vec![ToolRequest::new("update_loan_application_details", json!({}))],
            },
            tool_message("update_loan_application_details", "{}"),
            Message::assistant("Noted. What is your name?"),
            Message::human("John Doe"),
        ];
        let window = windowed(&history, 3);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0], Message::human("John Doe"));

        let window = windowed(&history, 10);
        assert_eq!(window.len(), 5);
    }

    #[test]
    fn test_window_of_only_tool_messages_extends_back() {
        let history = vec![
            Message::human("Check my credit"),
            Message::Assistant {
                content: String::new(),
                tool_calls: vec![ToolRequest::new("evaluate_creditworthiness", json!({"amount": 1}))],
            },
            tool_message("evaluate_creditworthiness", r#"{"ok":true}"#),
        ];
        let window = windowed(&history, 1);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_contents_merge_function_responses() {
        let history = vec![
            Message::human("Verify KYC and check credit"),
            Message::Assistant {
                content: String::new(),
                tool_calls: vec![
                    ToolRequest::new("verify_kyc", json!({"name": "John Doe"})),
                    ToolRequest::new("evaluate_creditworthiness", json!({"amount": 100000})),
                ],
            },
            tool_message("verify_kyc", r#"{"ok":true,"summary":"verified"}"#),
            tool_message("evaluate_creditworthiness", "plain text"),
        ];
        let contents = to_contents(&history);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[1].parts.len(), 2);
        assert_eq!(contents[2].parts.len(), 2);
        let second = contents[2].parts[1].function_response.as_ref().unwrap();
        assert_eq!(second.response, json!({"content": "plain text"}));
    }

    #[test]
    fn test_decide_prefers_function_calls() {
        let parts = vec![
            Part::text("Let me check."),
            Part {
                function_call: Some(FunctionCall {
                    name: "verify_kyc".to_string(),
                    args: json!({"name": "John Doe"}),
                }),
                ..Part::default()
            },
        ];
        match decide(&parts).unwrap() {
            RouterDecision::ToolCalls(calls) => assert_eq!(calls[0].name, "verify_kyc"),
            other => panic!("unexpected decision {:?}", other),
        }

        assert_eq!(
            decide(&[Part::text("Hello!")]).unwrap(),
            RouterDecision::Reply("Hello!".to_string())
        );
        assert_eq!(decide(&[]).unwrap_err().code(), "router_error");
    }
}
