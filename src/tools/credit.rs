//! Creditworthiness evaluation

use super::ToolOutput;
use crate::error::AssistantError;
use crate::models::{CreditEligibility, LoanApplication, LoanStatus};
use crate::policy::{CreditPolicy, Verdict};
use crate::Result;
use serde_json::json;
use tracing::{info, warn};

fn verdict_output(app: &LoanApplication, checks: serde_json::Value) -> ToolOutput {
    let summary = match app.credit_eligibility {
        CreditEligibility::Eligible => format!(
            "Eligible; offered {:.2}",
            app.offered_amount.unwrap_or_default()
        ),
        _ => "Not eligible".to_string(),
    };
    ToolOutput::new(
        summary,
        json!({
            "credit_eligibility": app.credit_eligibility,
            "offered_amount": app.offered_amount,
            "offered_interest_rate": app.offered_interest_rate,
            "credit_score": app.credit_score,
            "status": app.status,
            "checks": checks,
        }),
    )
}

/// Evaluate `amount` with `policy`. A requested amount that differs from the
/// recorded one replaces it before scoring.
pub fn evaluate_credit(
    app: &mut LoanApplication,
    amount: f64,
    policy: &dyn CreditPolicy,
) -> Result<ToolOutput> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AssistantError::InvalidField {
            field: "amount",
            reason: format!("must be a positive amount, got {}", amount),
        });
    }

    let already_evaluated = app.credit_eligibility != CreditEligibility::Pending
        && app.evaluated_amount == Some(amount)
        && app.desired_amount == Some(amount);
    if already_evaluated {
        return Ok(verdict_output(app, serde_json::Value::Null));
    }

    if app.status.is_terminal() {
        return Err(AssistantError::ApplicationClosed(app.status.to_string()));
    }

    let mut profile = app.clone();
    profile.desired_amount = Some(amount);
    let assessment = policy.assess(amount, &profile);

    let offer = assessment
        .offered_amount
        .unwrap_or(amount)
        .min(amount);
    let verdict = match assessment.verdict {
        Verdict::Eligible if offer > 0.0 => Verdict::Eligible,
        Verdict::Eligible => {
            warn!(policy = policy.name(), offer, "Policy produced a non-positive offer");
            Verdict::NotEligible
        }
        Verdict::NotEligible => Verdict::NotEligible,
    };

    app.desired_amount = Some(amount);
    app.evaluated_amount = Some(amount);
    app.credit_score = assessment.credit_score;
    app.credit_eligibility = verdict.into();

    match verdict {
        Verdict::Eligible => {
            app.offered_amount = Some(offer);
            app.offered_interest_rate = assessment.interest_rate;
        }
        Verdict::NotEligible => {
            app.offered_amount = None;
            app.offered_interest_rate = None;
            app.advance_status(LoanStatus::Declined);
        }
    }

    info!(
        policy = policy.name(),
        eligibility = %app.credit_eligibility,
        status = %app.status,
        "Creditworthiness evaluated"
    );

    let checks = serde_json::to_value(&assessment.checks)?;
    Ok(verdict_output(app, checks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CreditAssessment, ThresholdCreditPolicy};

    fn applicant(name: &str, amount: f64) -> LoanApplication {
        LoanApplication {
            applicant_name: Some(name.to_string()),
            desired_amount: Some(amount),
            status: LoanStatus::CreditCheckPending,
            kyc_verified: true,
            ..LoanApplication::default()
        }
    }

    /// Offers more than requested to check the handler's clamp
    struct GenerousPolicy;

    impl CreditPolicy for GenerousPolicy {
        fn name(&self) -> &'static str {
            "generous"
        }

        fn assess(&self, amount: f64, _application: &LoanApplication) -> CreditAssessment {
            CreditAssessment {
                verdict: Verdict::Eligible,
                offered_amount: Some(amount * 2.0),
                credit_score: None,
                interest_rate: Some(9.0),
                checks: vec![],
            }
        }
    }

    #[test]
    fn test_verdict_is_never_pending() {
        let policy = ThresholdCreditPolicy::default();
        for name in ["John Doe", "Amit Shah", "Jane Smith"] {
            let mut app = applicant(name, 100_000.0);
            evaluate_credit(&mut app, 100_000.0, &policy).unwrap();
            assert_ne!(app.credit_eligibility, CreditEligibility::Pending);
        }
    }

    #[test]
    fn test_eligible_sets_offer_within_amount() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = applicant("John Doe", 100_000.0);
        evaluate_credit(&mut app, 100_000.0, &policy).unwrap();

        assert_eq!(app.credit_eligibility, CreditEligibility::Eligible);
        let offered = app.offered_amount.unwrap();
        assert!(offered > 0.0 && offered <= 100_000.0);
        assert_eq!(app.status, LoanStatus::CreditCheckPending);
    }

    #[test]
    fn test_not_eligible_declines() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = applicant("Amit Shah", 100_000.0);
        evaluate_credit(&mut app, 100_000.0, &policy).unwrap();

        assert_eq!(app.credit_eligibility, CreditEligibility::NotEligible);
        assert_eq!(app.offered_amount, None);
        assert_eq!(app.status, LoanStatus::Declined);
        let declined = app.clone();

        let again = evaluate_credit(&mut app, 100_000.0, &policy).unwrap();
        assert_eq!(again.summary, "Not eligible");
        assert_eq!(app, declined);

        let err = evaluate_credit(&mut app, 50_000.0, &policy).unwrap_err();
        assert_eq!(err.code(), "application_closed");
        assert_eq!(app, declined);
    }

    #[test]
    fn test_same_amount_after_sanction_repeats_verdict() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = applicant("John Doe", 100_000.0);
        evaluate_credit(&mut app, 100_000.0, &policy).unwrap();
        app.advance_status(LoanStatus::Sanctioned);
        let sanctioned = app.clone();

        let again = evaluate_credit(&mut app, 100_000.0, &policy).unwrap();
        assert_eq!(again.data["offered_amount"], json!(sanctioned.offered_amount));
        assert_eq!(again.data["credit_eligibility"], json!("eligible"));
        assert_eq!(app, sanctioned);

        let err = evaluate_credit(&mut app, 200_000.0, &policy).unwrap_err();
        assert_eq!(err.code(), "application_closed");
        assert_eq!(app, sanctioned);
    }

    #[test]
    fn test_unchanged_amount_returns_identical_verdict() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = applicant("John Doe", 100_000.0);
        evaluate_credit(&mut app, 100_000.0, &policy).unwrap();
        let first = app.clone();

        evaluate_credit(&mut app, 100_000.0, &GenerousPolicy).unwrap();
        assert_eq!(app, first);
    }

    #[test]
    fn test_changed_amount_allows_reevaluation() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = applicant("John Doe", 100_000.0);
        evaluate_credit(&mut app, 100_000.0, &policy).unwrap();

        evaluate_credit(&mut app, 450_000.0, &policy).unwrap();
        assert_eq!(app.desired_amount, Some(450_000.0));
        assert_eq!(app.evaluated_amount, Some(450_000.0));
        assert_eq!(app.offered_amount, Some(374_000.0));
    }

    #[test]
    fn test_offer_is_clamped_to_amount() {
        let mut app = applicant("John Doe", 80_000.0);
        evaluate_credit(&mut app, 80_000.0, &GenerousPolicy).unwrap();
        assert_eq!(app.offered_amount, Some(80_000.0));
    }

    #[test]
    fn test_invalid_amount_is_rejected() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = applicant("John Doe", 100_000.0);
        let before = app.clone();
        assert!(evaluate_credit(&mut app, 0.0, &policy).is_err());
        assert!(evaluate_credit(&mut app, f64::NAN, &policy).is_err());
        assert_eq!(app, before);
    }

    #[test]
    fn test_unset_amount_is_adopted() {
        let policy = ThresholdCreditPolicy::default();
        let mut app = LoanApplication::new();
        evaluate_credit(&mut app, 100_000.0, &policy).unwrap();
        assert_eq!(app.desired_amount, Some(100_000.0));
        assert_ne!(app.credit_eligibility, CreditEligibility::Pending);
    }
}
