//! KYC identity verification

use super::ToolOutput;
use crate::error::AssistantError;
use crate::models::{normalize_name, LoanApplication, LoanStatus};
use crate::Result;
use serde_json::json;
use tracing::{info, warn};

/// Compare `candidate` with the name on the application. Matching is exact
/// after lowercasing and collapsing whitespace.
pub fn verify_kyc(app: &mut LoanApplication, candidate: &str) -> Result<ToolOutput> {
    let Some(stored) = app.applicant_name.as_deref() else {
        return Err(AssistantError::MissingPrerequisite(
            "applicant name must be recorded before KYC verification".to_string(),
        ));
    };

    let provided = normalize_name(candidate);
    let matches = !provided.is_empty() && provided == normalize_name(stored);

    if app.kyc_verified {
        if !matches {
            warn!("KYC name mismatch after verification");
            return Err(AssistantError::KycMismatch {
                provided: candidate.trim().to_string(),
            });
        }
        return Ok(ToolOutput::new(
            "KYC already verified",
            json!({ "kyc_verified": true, "status": app.status }),
        ));
    }

    match app.status {
        LoanStatus::CollectingDetails | LoanStatus::KycPending => {}
        status if status.is_terminal() => {
            return Err(AssistantError::ApplicationClosed(status.to_string()));
        }
        status => {
            return Err(AssistantError::PreconditionNotMet(format!(
                "KYC cannot be verified from status {}",
                status
            )));
        }
    }

    if !matches {
        warn!("KYC name mismatch");
        return Err(AssistantError::KycMismatch {
            provided: candidate.trim().to_string(),
        });
    }

    app.kyc_verified = true;
    app.advance_status(LoanStatus::CreditCheckPending);

    info!(status = %app.status, "KYC verified");

    Ok(ToolOutput::new(
        "KYC verified",
        json!({ "kyc_verified": true, "status": app.status }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> LoanApplication {
        LoanApplication {
            applicant_name: Some(name.to_string()),
            ..LoanApplication::default()
        }
    }

    #[test]
    fn test_matching_name_verifies() {
        let mut app = named("John Doe");
        verify_kyc(&mut app, "John Doe").unwrap();
        assert!(app.kyc_verified);
        assert_eq!(app.status, LoanStatus::CreditCheckPending);
    }

    #[test]
    fn test_match_ignores_case_and_spacing() {
        let mut app = named("John Doe");
        verify_kyc(&mut app, "  JOHN   doe ").unwrap();
        assert!(app.kyc_verified);
    }

    #[test]
    fn test_mismatch_leaves_state_unchanged() {
        let mut app = named("John Doe");
        app.status = LoanStatus::KycPending;
        let before = app.clone();

        let err = verify_kyc(&mut app, "Jon Doe").unwrap_err();
        assert!(matches!(err, AssistantError::KycMismatch { .. }));
        assert!(err.is_recoverable());
        assert_eq!(app, before);

        // Partial names are not a match
        assert!(verify_kyc(&mut app, "John").is_err());
        assert!(verify_kyc(&mut app, "").is_err());
        assert_eq!(app, before);
    }

    #[test]
    fn test_missing_name_is_a_prerequisite_error() {
        let mut app = LoanApplication::new();
        let err = verify_kyc(&mut app, "John Doe").unwrap_err();
        assert_eq!(err.code(), "missing_prerequisite");
        assert!(!app.kyc_verified);
    }

    #[test]
    fn test_repeat_verification_is_a_no_op() {
        let mut app = named("John Doe");
        verify_kyc(&mut app, "John Doe").unwrap();
        let after_first = app.clone();
        verify_kyc(&mut app, "John Doe").unwrap();
        assert_eq!(app, after_first);
    }

    #[test]
    fn test_other_name_after_verification_is_a_mismatch() {
        let mut app = named("John Doe");
        verify_kyc(&mut app, "John Doe").unwrap();
        let after_first = app.clone();

        let err = verify_kyc(&mut app, "Mallory Evil").unwrap_err();
        assert!(matches!(err, AssistantError::KycMismatch { .. }));
        assert_eq!(app, after_first);

        // Still a mismatch once the application has moved on
        app.status = LoanStatus::Sanctioned;
        let err = verify_kyc(&mut app, "Mallory Evil").unwrap_err();
        assert_eq!(err.code(), "kyc_mismatch");
    }

    #[test]
    fn test_declined_application_cannot_be_verified() {
        let mut app = named("John Doe");
        app.status = LoanStatus::Declined;
        let err = verify_kyc(&mut app, "John Doe").unwrap_err();
        assert_eq!(err.code(), "application_closed");
        assert!(!app.kyc_verified);
        assert_eq!(app.status, LoanStatus::Declined);
    }
}
