//! Core data models for the loan assistant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Session Identity =================
//

/// Stable key correlating every turn of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

//
// ================= Messages =================
//

/// A tool invocation as requested by the reasoning router, before it has
/// been resolved against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Human {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolRequest>,
    },
    Tool {
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::Human { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }
}

//
// ================= Enums =================
//

/// Forward-only application lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    #[default]
    CollectingDetails,
    KycPending,
    CreditCheckPending,
    Sanctioned,
    Declined,
}

impl LoanStatus {
    fn rank(&self) -> u8 {
        match self {
            LoanStatus::CollectingDetails => 0,
            LoanStatus::KycPending => 1,
            LoanStatus::CreditCheckPending => 2,
            LoanStatus::Sanctioned | LoanStatus::Declined => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Sanctioned | LoanStatus::Declined)
    }

    /// Whether moving to `next` keeps the lifecycle monotonic
    pub fn can_advance_to(&self, next: LoanStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::CollectingDetails => "collecting_details",
            LoanStatus::KycPending => "kyc_pending",
            LoanStatus::CreditCheckPending => "credit_check_pending",
            LoanStatus::Sanctioned => "sanctioned",
            LoanStatus::Declined => "declined",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CreditEligibility {
    #[default]
    Pending,
    Eligible,
    NotEligible,
}

impl fmt::Display for CreditEligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CreditEligibility::Pending => "pending",
            CreditEligibility::Eligible => "eligible",
            CreditEligibility::NotEligible => "not_eligible",
        };
        f.write_str(s)
    }
}

//
// ================= Loan Application =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanctionLetter {
    pub reference: String,
    pub applicant_name: String,
    pub sanctioned_amount: f64,
    pub interest_rate: Option<f64>,
    pub term_months: Option<u32>,
    pub purpose: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoanApplication {
    pub applicant_name: Option<String>,
    pub desired_amount: Option<f64>,
    pub loan_term_months: Option<u32>,
    pub purpose: Option<String>,
    #[serde(default)]
    pub status: LoanStatus,
    #[serde(default)]
    pub kyc_verified: bool,
    #[serde(default)]
    pub credit_eligibility: CreditEligibility,
    pub offered_amount: Option<f64>,
    #[serde(default)]
    pub sanction_letter_generated: bool,

    // Populated by credit evaluation and sanction
    #[serde(default)]
    pub credit_score: Option<u16>,
    #[serde(default)]
    pub offered_interest_rate: Option<f64>,
    /// Amount the current verdict was computed for
    #[serde(default)]
    pub evaluated_amount: Option<f64>,
    #[serde(default)]
    pub sanction_letter: Option<SanctionLetter>,
}

impl LoanApplication {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move status forward; requests that would regress are ignored.
    pub fn advance_status(&mut self, next: LoanStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Case-insensitive, whitespace-collapsed form used for name comparison
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

//
// ================= Session State =================
//

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    messages: Vec<Message>,
    pub application: LoanApplication,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Content of the most recent Assistant message without pending tool calls
    pub fn last_reply(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant {
                content,
                tool_calls,
            } if tool_calls.is_empty() => Some(content.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_regresses() {
        let mut app = LoanApplication::new();
        assert!(app.advance_status(LoanStatus::CreditCheckPending));
        assert!(!app.advance_status(LoanStatus::KycPending));
        assert_eq!(app.status, LoanStatus::CreditCheckPending);

        assert!(app.advance_status(LoanStatus::Declined));
        assert!(!app.advance_status(LoanStatus::Sanctioned));
        assert_eq!(app.status, LoanStatus::Declined);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  John   DOE "), "john doe");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_message_serialization_is_tagged() {
        let msg = Message::Assistant {
            content: String::new(),
            tool_calls: vec![ToolRequest::new(
                "verify_kyc",
                serde_json::json!({"name": "John Doe"}),
            )],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "assistant");
        assert_eq!(json["tool_calls"][0]["name"], "verify_kyc");

        let status = serde_json::to_value(LoanStatus::CreditCheckPending).unwrap();
        assert_eq!(status, "credit_check_pending");
        let eligibility = serde_json::to_value(CreditEligibility::NotEligible).unwrap();
        assert_eq!(eligibility, "not_eligible");
    }

    #[test]
    fn test_last_reply_skips_tool_requests() {
        let mut state = SessionState::new();
        state.push_message(Message::assistant("Hello"));
        state.push_message(Message::human("hi"));
        state.push_message(Message::Assistant {
            content: String::new(),
            tool_calls: vec![ToolRequest::new("retrieve_context", serde_json::json!({}))],
        });
        assert_eq!(state.last_reply(), Some("Hello"));
    }
}
