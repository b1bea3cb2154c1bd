//! Sanction letter generation

use super::ToolOutput;
use crate::error::AssistantError;
use crate::models::{CreditEligibility, LoanApplication, LoanStatus, SanctionLetter};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

fn letter_reference(name: &str, amount: f64, issued_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.update(issued_at.to_rfc3339().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("SL-{}", digest[..12].to_uppercase())
}

fn render_letter(app: &LoanApplication, name: &str, amount: f64) -> SanctionLetter {
    let issued_at = Utc::now();
    let reference = letter_reference(name, amount, issued_at);

    let mut terms = format!("an amount of {:.2}", amount);
    if let Some(rate) = app.offered_interest_rate {
        terms.push_str(&format!(" at an interest rate of {:.2}% per annum", rate));
    }
    if let Some(months) = app.loan_term_months {
        terms.push_str(&format!(" for a term of {} months", months));
    }
    if let Some(purpose) = app.purpose.as_deref() {
        terms.push_str(&format!(" (purpose: {})", purpose));
    }

    let body = format!(
        "LOAN SANCTION LETTER\n\
         Reference: {reference}\n\
         Date: {date}\n\n\
         Dear {name},\n\n\
         We are pleased to inform you that your loan application has been sanctioned for {terms}.\n\n\
         This sanction is subject to verification of original documents before disbursement.\n",
        reference = reference,
        date = issued_at.format("%Y-%m-%d"),
        name = name,
        terms = terms,
    );

    SanctionLetter {
        reference,
        applicant_name: name.to_string(),
        sanctioned_amount: amount,
        interest_rate: app.offered_interest_rate,
        term_months: app.loan_term_months,
        purpose: app.purpose.clone(),
        issued_at,
        body,
    }
}

fn letter_output(letter: &SanctionLetter) -> ToolOutput {
    ToolOutput::new(
        format!("Sanction letter {} issued", letter.reference),
        json!({ "sanction_letter": letter, "status": LoanStatus::Sanctioned }),
    )
}

/// Issue the letter. Requires verified KYC and an eligible verdict at call
/// time; once sanctioned, repeat calls return the stored letter.
pub fn generate_sanction_letter(app: &mut LoanApplication) -> Result<ToolOutput> {
    if app.status == LoanStatus::Sanctioned && app.sanction_letter_generated {
        if let Some(letter) = app.sanction_letter.as_ref() {
            return Ok(letter_output(letter));
        }
    }

    let mut unmet = Vec::new();
    if !app.kyc_verified {
        unmet.push("KYC is not verified");
    }
    if app.credit_eligibility != CreditEligibility::Eligible {
        unmet.push("applicant is not credit eligible");
    }
    if !unmet.is_empty() {
        return Err(AssistantError::PreconditionNotMet(unmet.join("; ")));
    }
    if app.status.is_terminal() {
        return Err(AssistantError::ApplicationClosed(app.status.to_string()));
    }

    let name = app.applicant_name.clone().ok_or_else(|| {
        AssistantError::MissingPrerequisite("applicant name is not recorded".to_string())
    })?;
    let amount = app
        .offered_amount
        .filter(|amount| *amount > 0.0)
        .ok_or_else(|| AssistantError::PreconditionNotMet("no loan offer on record".to_string()))?;

    let letter = render_letter(app, &name, amount);
    let output = letter_output(&letter);

    app.sanction_letter = Some(letter);
    app.sanction_letter_generated = true;
    app.advance_status(LoanStatus::Sanctioned);

    info!(status = %app.status, "Sanction letter generated");

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved() -> LoanApplication {
        LoanApplication {
            applicant_name: Some("John Doe".to_string()),
            desired_amount: Some(100_000.0),
            loan_term_months: Some(24),
            purpose: Some("car".to_string()),
            status: LoanStatus::CreditCheckPending,
            kyc_verified: true,
            credit_eligibility: CreditEligibility::Eligible,
            offered_amount: Some(100_000.0),
            offered_interest_rate: Some(11.58),
            evaluated_amount: Some(100_000.0),
            ..LoanApplication::default()
        }
    }

    #[test]
    fn test_generates_letter_when_preconditions_hold() {
        let mut app = approved();
        generate_sanction_letter(&mut app).unwrap();

        assert!(app.sanction_letter_generated);
        assert_eq!(app.status, LoanStatus::Sanctioned);
        let letter = app.sanction_letter.as_ref().unwrap();
        assert!(letter.body.contains("John Doe"));
        assert!(letter.body.contains("100000.00"));
        assert!(letter.reference.starts_with("SL-"));
    }

    #[test]
    fn test_fails_for_every_other_precondition_combination() {
        let combinations = [
            (false, CreditEligibility::Eligible),
            (true, CreditEligibility::Pending),
            (true, CreditEligibility::NotEligible),
            (false, CreditEligibility::Pending),
            (false, CreditEligibility::NotEligible),
        ];
        for (kyc_verified, eligibility) in combinations {
            let mut app = approved();
            app.kyc_verified = kyc_verified;
            app.credit_eligibility = eligibility;
            let before = app.clone();

            let err = generate_sanction_letter(&mut app).unwrap_err();
            assert_eq!(err.code(), "precondition_not_met");
            assert_eq!(app, before);
        }
    }

    #[test]
    fn test_repeat_generation_returns_same_state() {
        let mut app = approved();
        generate_sanction_letter(&mut app).unwrap();
        let first = app.clone();

        let output = generate_sanction_letter(&mut app).unwrap();
        assert_eq!(app, first);
        assert_eq!(
            output.data["sanction_letter"]["reference"],
            first.sanction_letter.unwrap().reference
        );
    }
}
