//! Deterministic keyword router
//!
//! Used when no LLM is configured and as the reference router in tests.
//! Extraction is heuristic: amounts, terms, purposes and names are pulled
//! from the latest human message, intents from consent keywords.

use super::{ReasoningRouter, RouterDecision, RoutingRequest};
use crate::models::{CreditEligibility, LoanApplication, LoanStatus, Message, ToolRequest};
use crate::tools::{DetailUpdate, ToolKind};
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

/// Static keyword lists
const PURPOSES: &[(&str, &str)] = &[
    ("home", "home"),
    ("house", "home"),
    ("car", "car"),
    ("vehicle", "car"),
    ("education", "education"),
    ("studies", "education"),
    ("medical", "medical"),
    ("wedding", "wedding"),
    ("marriage", "wedding"),
    ("business", "business"),
    ("renovation", "renovation"),
    ("travel", "travel"),
    ("vacation", "travel"),
    ("personal", "personal"),
];

const CONSENT_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "sure", "ok", "okay", "proceed", "go", "please", "agree", "consent",
];

const QUESTION_OPENERS: &[&str] = &[
    "what", "how", "which", "why", "when", "where", "can", "could", "do", "does", "is", "are",
    "tell",
];

const NAME_MARKERS: &[&[&str]] = &[&["my", "name", "is"], &["name", "is"], &["i", "am"], &["i'm"]];

/// Bare numbers below this are not treated as loan amounts
const MIN_BARE_AMOUNT: f64 = 1_000.0;

lazy_static! {
    static ref TERM_RE: Regex = Regex::new(r"(?i)\b(\d+)\s*(months?|mo|years?|yrs?)\b").unwrap();
    static ref AMOUNT_RE: Regex =
        Regex::new(r"(?i)\b(\d+(?:,\d+)*(?:\.\d+)?)\s*(lakhs?|lacs?|crores?|thousand|k)?\b").unwrap();
}

struct Token {
    raw: String,
    lower: String,
    ends_clause: bool,
}

fn tokenize(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .filter_map(|word| {
            let raw = word
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_string();
            if raw.is_empty() {
                return None;
            }
            let ends_clause = word.ends_with(['.', ',', '!', '?', ';', ':']);
            Some(Token {
                lower: raw.to_lowercase(),
                raw,
                ends_clause,
            })
        })
        .collect()
}

fn unit_multiplier(unit: &str) -> f64 {
    let unit = unit.to_lowercase();
    if unit.starts_with("lakh") || unit.starts_with("lac") {
        100_000.0
    } else if unit.starts_with("crore") {
        10_000_000.0
    } else {
        1_000.0
    }
}

#[derive(Debug, Default)]
struct Extraction {
    details: DetailUpdate,
    name_stated: Option<String>,
    wants_kyc: bool,
    wants_credit_check: bool,
    accepts_offer: bool,
    is_question: bool,
}

fn extract(text: &str, app: &LoanApplication) -> Extraction {
    let tokens = tokenize(text);
    let lower = text.to_lowercase();
    let mut out = Extraction::default();

    // Terms first so their numbers are never read as amounts
    let mut term_spans = Vec::new();
    for caps in TERM_RE.captures_iter(text) {
        let (Some(whole), Ok(count)) = (caps.get(0), caps[1].parse::<i64>()) else {
            continue;
        };
        term_spans.push(whole.range());
        let months = if caps[2].to_lowercase().starts_with('y') {
            count.saturating_mul(12)
        } else {
            count
        };
        out.details.loan_term_months.get_or_insert(months);
    }

    out.details.desired_amount = AMOUNT_RE.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        if term_spans.iter().any(|span| span.contains(&whole.start())) {
            return None;
        }
        let value: f64 = caps[1].replace(',', "").parse().ok()?;
        match caps.get(2) {
            Some(unit) => Some(value * unit_multiplier(unit.as_str())),
            None if value >= MIN_BARE_AMOUNT => Some(value),
            None => None,
        }
    });

    // Purpose
    out.details.purpose = tokens.iter().find_map(|t| {
        PURPOSES
            .iter()
            .find(|(word, _)| *word == t.lower)
            .map(|(_, canonical)| canonical.to_string())
    });

    // Name after a marker, capitalized words only
    for marker in NAME_MARKERS {
        let Some(start) = tokens
            .windows(marker.len())
            .position(|w| w.iter().zip(marker.iter()).all(|(t, m)| t.lower == *m))
        else {
            continue;
        };
        let mut parts = Vec::new();
        for token in tokens.iter().skip(start + marker.len()).take(4) {
            let capitalized = token.raw.chars().next().is_some_and(char::is_uppercase);
            if !capitalized || !token.raw.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-') {
                break;
            }
            parts.push(token.raw.clone());
            if token.ends_clause {
                break;
            }
        }
        if !parts.is_empty() {
            out.name_stated = Some(parts.join(" "));
            break;
        }
    }

    let has_word = |w: &str| tokens.iter().any(|t| t.lower == w);
    let consents = CONSENT_WORDS.iter().any(|w| has_word(w));

    out.is_question = text.trim_end().ends_with('?')
        || tokens
            .first()
            .is_some_and(|t| QUESTION_OPENERS.contains(&t.lower.as_str()));

    out.wants_kyc = has_word("kyc")
        || lower.contains("know your customer")
        || (has_word("verify") && (has_word("identity") || has_word("me")));
    out.wants_credit_check = has_word("credit") && (consents || has_word("check"));
    out.accepts_offer = has_word("accept")
        || (has_word("agree") && has_word("offer"))
        || (consents
            && app.credit_eligibility == CreditEligibility::Eligible
            && !app.sanction_letter_generated
            && !out.wants_kyc
            && !out.wants_credit_check);

    // A question is a request for information, not consent
    if out.is_question {
        out.wants_kyc = false;
        out.wants_credit_check = false;
        out.accepts_offer = false;
    }

    if let Some(name) = out.name_stated.as_ref() {
        if app.applicant_name.is_none() || !out.wants_kyc {
            out.details.applicant_name = Some(name.clone());
        }
    }

    out
}

fn plan(text: &str, app: &LoanApplication, available: &dyn Fn(ToolKind) -> bool) -> Vec<ToolRequest> {
    let ex = extract(text, app);
    let mut calls = Vec::new();

    let push = |calls: &mut Vec<ToolRequest>, kind: ToolKind, args: Value| {
        if available(kind) {
            calls.push(ToolRequest::new(kind.name(), args));
        }
    };

    if !ex.details.is_empty() {
        let args = serde_json::to_value(&ex.details)
            .map(strip_nulls)
            .unwrap_or_else(|_| json!({}));
        push(&mut calls, ToolKind::UpdateLoanApplicationDetails, args);
    }

    if ex.wants_kyc {
        let candidate = ex
            .name_stated
            .clone()
            .or_else(|| ex.details.applicant_name.clone())
            .or_else(|| app.applicant_name.clone());
        if let Some(name) = candidate {
            push(&mut calls, ToolKind::VerifyKyc, json!({ "name": name }));
        }
    }

    if ex.wants_credit_check {
        if let Some(amount) = ex.details.desired_amount.or(app.desired_amount) {
            push(&mut calls, ToolKind::EvaluateCreditworthiness, json!({ "amount": amount }));
        }
    }

    if ex.accepts_offer {
        push(&mut calls, ToolKind::GenerateLoanSanctionLetter, json!({}));
    }

    if ex.is_question {
        push(&mut calls, ToolKind::RetrieveContext, json!({ "query": text.trim() }));
    }

    calls
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}

fn format_amount(amount: f64) -> String {
    format!("{:.0}", amount)
}

/// What to ask for next given the application
pub fn next_step_prompt(app: &LoanApplication) -> String {
    match app.status {
        LoanStatus::Sanctioned => {
            return "Your loan has been sanctioned. Is there anything else I can help you with?"
                .to_string();
        }
        LoanStatus::Declined => {
            return "Unfortunately we are unable to offer you a loan at this time. You are welcome to ask about our other products."
                .to_string();
        }
        _ => {}
    }

    if app.desired_amount.is_none() {
        return "How much would you like to borrow?".to_string();
    }
    if app.purpose.is_none() {
        return "What will the loan be used for?".to_string();
    }
    if app.applicant_name.is_none() {
        return "May I have your full name, please?".to_string();
    }
    if !app.kyc_verified {
        return "Next I need to verify your identity (KYC). Shall I proceed?".to_string();
    }
    match app.credit_eligibility {
        CreditEligibility::Pending => format!(
            "Shall I run a credit check for {}?",
            format_amount(app.desired_amount.unwrap_or_default())
        ),
        CreditEligibility::Eligible => {
            let mut offer = format!(
                "Good news! You are eligible for {}",
                format_amount(app.offered_amount.unwrap_or_default())
            );
            if let Some(rate) = app.offered_interest_rate {
                offer.push_str(&format!(" at {:.2}% per annum", rate));
            }
            offer.push_str(". Would you like to accept the offer?");
            offer
        }
        CreditEligibility::NotEligible => {
            "Unfortunately you are not eligible for this loan.".to_string()
        }
    }
}

fn describe_tool_result(name: &str, content: &str, is_error: bool) -> Option<String> {
    let body: Value = serde_json::from_str(content).unwrap_or(Value::Null);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(content)
        .to_string();

    if is_error {
        let code = body.get("error").and_then(Value::as_str).unwrap_or_default();
        let text = match code {
            "kyc_mismatch" => "The name you gave does not match the name on your application. Could you re-enter your full name exactly as it appears on your ID?".to_string(),
            "invalid_field" | "invalid_tool_input" => format!("{}. Could you check that and send it again?", message),
            "precondition_not_met" => format!("I can't do that yet: {}.", message),
            _ => format!("{}.", message),
        };
        return Some(text);
    }

    match ToolKind::from_name(name)? {
        ToolKind::RetrieveContext => {
            let document = body
                .pointer("/data/document")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if document.is_empty() {
                Some("I couldn't find anything specific on that.".to_string())
            } else {
                Some(format!("Here is what I found: {}", document))
            }
        }
        ToolKind::GenerateLoanSanctionLetter => {
            let reference = body
                .pointer("/data/sanction_letter/reference")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(format!(
                "Congratulations! Your sanction letter {} has been issued.",
                reference
            ))
        }
        ToolKind::VerifyKyc => Some("Thank you, your identity is verified.".to_string()),
        _ => None,
    }
}

fn compose_reply(history: &[Message], app: &LoanApplication) -> String {
    let since_human = history
        .iter()
        .rposition(|m| matches!(m, Message::Human { .. }))
        .map(|idx| &history[idx + 1..])
        .unwrap_or(history);

    let mut lines: Vec<String> = since_human
        .iter()
        .filter_map(|m| match m {
            Message::Tool {
                name,
                content,
                is_error,
            } => describe_tool_result(name, content, *is_error),
            _ => None,
        })
        .collect();

    let prompt = next_step_prompt(app);
    if !lines.iter().any(|l| l == &prompt) {
        lines.push(prompt);
    }
    lines.join(" ")
}

pub struct KeywordRouter;

#[async_trait]
impl ReasoningRouter for KeywordRouter {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn route(&self, request: RoutingRequest<'_>) -> Result<RouterDecision> {
        let available = |kind: ToolKind| request.catalog.iter().any(|spec| spec.name == kind.name());

        let decision = match request.history.last() {
            Some(Message::Human { content }) => {
                let calls = plan(content, request.application, &available);
                if calls.is_empty() {
                    RouterDecision::Reply(next_step_prompt(request.application))
                } else {
                    RouterDecision::ToolCalls(calls)
                }
            }
            Some(Message::Tool { .. }) => {
                RouterDecision::Reply(compose_reply(request.history, request.application))
            }
            _ => RouterDecision::Reply(next_step_prompt(request.application)),
        };
        Ok(decision)
    }
}
