//! Partial merge of applicant details

use super::ToolOutput;
use crate::error::AssistantError;
use crate::models::{normalize_name, CreditEligibility, LoanApplication, LoanStatus};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Any subset of the collectable fields. Absent fields are left as they are.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailUpdate {
    #[serde(default)]
    pub applicant_name: Option<String>,
    #[serde(default)]
    pub desired_amount: Option<f64>,
    #[serde(default)]
    pub loan_term_months: Option<i64>,
    #[serde(default)]
    pub purpose: Option<String>,
}

impl DetailUpdate {
    pub fn is_empty(&self) -> bool {
        self.applicant_name.is_none()
            && self.desired_amount.is_none()
            && self.loan_term_months.is_none()
            && self.purpose.is_none()
    }
}

/// Validated form of a `DetailUpdate`
struct CheckedUpdate {
    applicant_name: Option<String>,
    desired_amount: Option<f64>,
    loan_term_months: Option<u32>,
    purpose: Option<String>,
}

fn check(app: &LoanApplication, update: &DetailUpdate) -> Result<CheckedUpdate> {
    let applicant_name = match update.applicant_name.as_deref() {
        Some(raw) => {
            let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err(AssistantError::InvalidField {
                    field: "applicant_name",
                    reason: "must not be empty".to_string(),
                });
            }
            let changes_verified_name = app.kyc_verified
                && app
                    .applicant_name
                    .as_deref()
                    .is_some_and(|current| normalize_name(current) != normalize_name(&name));
            if changes_verified_name {
                return Err(AssistantError::InvalidField {
                    field: "applicant_name",
                    reason: "cannot change after KYC verification".to_string(),
                });
            }
            Some(name)
        }
        None => None,
    };

    let desired_amount = match update.desired_amount {
        Some(amount) if !amount.is_finite() || amount <= 0.0 => {
            return Err(AssistantError::InvalidField {
                field: "desired_amount",
                reason: format!("must be a positive amount, got {}", amount),
            });
        }
        other => other,
    };

    let loan_term_months = match update.loan_term_months {
        Some(term) => match u32::try_from(term) {
            Ok(months) if months > 0 => Some(months),
            _ => {
                return Err(AssistantError::InvalidField {
                    field: "loan_term_months",
                    reason: format!("must be a positive number of months, got {}", term),
                });
            }
        },
        None => None,
    };

    let purpose = match update.purpose.as_deref().map(str::trim) {
        Some("") => {
            return Err(AssistantError::InvalidField {
                field: "purpose",
                reason: "must not be empty".to_string(),
            });
        }
        other => other.map(str::to_string),
    };

    Ok(CheckedUpdate {
        applicant_name,
        desired_amount,
        loan_term_months,
        purpose,
    })
}

pub fn update_details(app: &mut LoanApplication, update: &DetailUpdate) -> Result<ToolOutput> {
    if app.status.is_terminal() {
        return Err(AssistantError::ApplicationClosed(app.status.to_string()));
    }

    let checked = check(app, update)?;
    let mut updated_fields = Vec::new();

    if let Some(name) = checked.applicant_name {
        app.applicant_name = Some(name);
        updated_fields.push("applicant_name");
    }

    if let Some(amount) = checked.desired_amount {
        // A new amount invalidates any verdict computed for the old one
        if app.desired_amount != Some(amount) && app.evaluated_amount.is_some() {
            app.credit_eligibility = CreditEligibility::Pending;
            app.offered_amount = None;
            app.offered_interest_rate = None;
            app.evaluated_amount = None;
        }
        app.desired_amount = Some(amount);
        updated_fields.push("desired_amount");
    }

    if let Some(term) = checked.loan_term_months {
        app.loan_term_months = Some(term);
        updated_fields.push("loan_term_months");
    }

    if let Some(purpose) = checked.purpose {
        app.purpose = Some(purpose);
        updated_fields.push("purpose");
    }

    if app.applicant_name.is_some() && app.desired_amount.is_some() {
        app.advance_status(LoanStatus::KycPending);
    }

    info!(
        fields = ?updated_fields,
        status = %app.status,
        "Loan application details updated"
    );

    let changed = if updated_fields.is_empty() {
        "nothing".to_string()
    } else {
        updated_fields.join(", ")
    };
    Ok(ToolOutput::new(
        format!("Updated {}", changed),
        json!({
            "updated_fields": updated_fields,
            "application": app,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_update() -> DetailUpdate {
        DetailUpdate {
            applicant_name: Some("John Doe".to_string()),
            desired_amount: Some(100_000.0),
            loan_term_months: Some(12),
            purpose: Some("Personal".to_string()),
        }
    }

    #[test]
    fn test_update_sets_all_fields() {
        let mut app = LoanApplication::new();
        update_details(&mut app, &full_update()).unwrap();

        assert_eq!(app.applicant_name.as_deref(), Some("John Doe"));
        assert_eq!(app.desired_amount, Some(100_000.0));
        assert_eq!(app.loan_term_months, Some(12));
        assert_eq!(app.purpose.as_deref(), Some("Personal"));
        assert_eq!(app.status, LoanStatus::KycPending);
    }

    #[test]
    fn test_update_is_idempotent_for_every_subset() {
        let full = full_update();
        for mask in 0u8..16 {
            let update = DetailUpdate {
                applicant_name: full.applicant_name.clone().filter(|_| mask & 1 != 0),
                desired_amount: full.desired_amount.filter(|_| mask & 2 != 0),
                loan_term_months: full.loan_term_months.filter(|_| mask & 4 != 0),
                purpose: full.purpose.clone().filter(|_| mask & 8 != 0),
            };

            let mut once = LoanApplication::new();
            update_details(&mut once, &update).unwrap();
            let mut twice = once.clone();
            update_details(&mut twice, &update).unwrap();

            assert_eq!(once, twice, "subset mask {:#06b}", mask);
        }
    }

    #[test]
    fn test_summary_lists_updated_fields() {
        let mut app = LoanApplication::new();
        let output = update_details(
            &mut app,
            &DetailUpdate {
                desired_amount: Some(50_000.0),
                purpose: Some("car".to_string()),
                ..DetailUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(output.summary, "Updated desired_amount, purpose");

        let output = update_details(&mut app, &DetailUpdate::default()).unwrap();
        assert_eq!(output.summary, "Updated nothing");
    }

    #[test]
    fn test_omitted_fields_are_not_cleared() {
        let mut app = LoanApplication::new();
        update_details(&mut app, &full_update()).unwrap();
        update_details(
            &mut app,
            &DetailUpdate {
                purpose: Some("car".to_string()),
                ..DetailUpdate::default()
            },
        )
        .unwrap();

        assert_eq!(app.applicant_name.as_deref(), Some("John Doe"));
        assert_eq!(app.desired_amount, Some(100_000.0));
        assert_eq!(app.purpose.as_deref(), Some("car"));
    }

    #[test]
    fn test_invalid_values_leave_state_untouched() {
        let mut app = LoanApplication::new();
        update_details(&mut app, &full_update()).unwrap();
        let before = app.clone();

        let bad_amount = DetailUpdate {
            applicant_name: Some("Jane Roe".to_string()),
            desired_amount: Some(-5.0),
            ..DetailUpdate::default()
        };
        let err = update_details(&mut app, &bad_amount).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidField { field: "desired_amount", .. }));
        assert_eq!(app, before);

        let bad_term = DetailUpdate {
            loan_term_months: Some(0),
            ..DetailUpdate::default()
        };
        assert!(update_details(&mut app, &bad_term).is_err());
        assert_eq!(app, before);

        let blank_name = DetailUpdate {
            applicant_name: Some("   ".to_string()),
            ..DetailUpdate::default()
        };
        assert!(update_details(&mut app, &blank_name).is_err());
        assert_eq!(app, before);
    }

    #[test]
    fn test_amount_change_invalidates_prior_verdict() {
        let mut app = LoanApplication::new();
        update_details(&mut app, &full_update()).unwrap();
        app.credit_eligibility = CreditEligibility::Eligible;
        app.offered_amount = Some(100_000.0);
        app.evaluated_amount = Some(100_000.0);

        update_details(
            &mut app,
            &DetailUpdate {
                desired_amount: Some(50_000.0),
                ..DetailUpdate::default()
            },
        )
        .unwrap();

        assert_eq!(app.credit_eligibility, CreditEligibility::Pending);
        assert_eq!(app.offered_amount, None);
    }

    #[test]
    fn test_verified_name_cannot_change() {
        let mut app = LoanApplication::new();
        update_details(&mut app, &full_update()).unwrap();
        app.kyc_verified = true;

        let rename = DetailUpdate {
            applicant_name: Some("Someone Else".to_string()),
            ..DetailUpdate::default()
        };
        assert!(update_details(&mut app, &rename).is_err());

        let same = DetailUpdate {
            applicant_name: Some("JOHN  doe".to_string()),
            ..DetailUpdate::default()
        };
        assert!(update_details(&mut app, &same).is_ok());
    }

    #[test]
    fn test_closed_application_rejects_updates() {
        let mut app = LoanApplication::new();
        app.status = LoanStatus::Declined;
        let err = update_details(&mut app, &full_update()).unwrap_err();
        assert_eq!(err.code(), "application_closed");
        assert_eq!(app.applicant_name, None);
    }
}
