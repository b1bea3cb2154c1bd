//! Credit policy for creditworthiness evaluation
//!
//! Rules-based, deterministic scoring. The evaluation handler only depends
//! on the `CreditPolicy` trait, so operators can swap the policy without
//! touching the handler.

use crate::config::PolicySettings;
use crate::models::{normalize_name, CreditEligibility, LoanApplication};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

/// Outcome of one evaluation. Never `pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Eligible,
    NotEligible,
}

impl From<Verdict> for CreditEligibility {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Eligible => CreditEligibility::Eligible,
            Verdict::NotEligible => CreditEligibility::NotEligible,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAssessment {
    pub verdict: Verdict,
    pub offered_amount: Option<f64>,
    pub credit_score: Option<u16>,
    pub interest_rate: Option<f64>,
    pub checks: Vec<PolicyCheck>,
}

/// Pluggable scoring policy over (amount, applicant profile)
pub trait CreditPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn assess(&self, amount: f64, application: &LoanApplication) -> CreditAssessment;
}

/// Inputs visible to each rule
pub struct ScoringContext {
    pub amount: f64,
    pub credit_score: u16,
    pub term_months: Option<u32>,
}

pub struct RuleResult {
    pub passed: bool,
    pub details: String,
}

pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &ScoringContext) -> RuleResult;
}

/// Deterministic stand-in for a bureau score: 600..=850 derived from the
/// normalized applicant name.
pub fn profile_credit_score(application: &LoanApplication) -> u16 {
    let name = normalize_name(application.applicant_name.as_deref().unwrap_or_default());
    let digest = Sha256::digest(name.as_bytes());
    let bucket = u16::from_be_bytes([digest[0], digest[1]]) % 251;
    600 + bucket
}

/// Default threshold policy
pub struct ThresholdCreditPolicy {
    settings: PolicySettings,
    rules: Vec<Box<dyn PolicyRule>>,
}

impl ThresholdCreditPolicy {
    pub fn new(settings: PolicySettings) -> Self {
        let rules: Vec<Box<dyn PolicyRule>> = vec![
            Box::new(MinimumCreditScoreRule {
                min_score: settings.min_credit_score,
            }),
            Box::new(MaximumLoanAmountRule {
                max_amount: settings.max_loan_amount,
            }),
            Box::new(MinimumLoanAmountRule {
                min_amount: settings.min_loan_amount,
            }),
            Box::new(LoanTermRangeRule {
                min_months: settings.min_term_months,
                max_months: settings.max_term_months,
            }),
        ];
        Self { settings, rules }
    }

    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    fn offer_for(&self, amount: f64, score: u16) -> f64 {
        let headroom = score.saturating_sub(self.settings.min_credit_score) as f64;
        let cap = (300_000.0 + headroom * 1_000.0).min(self.settings.max_loan_amount);
        amount.min(cap)
    }

    fn rate_for(&self, score: u16) -> f64 {
        let headroom = score.saturating_sub(self.settings.min_credit_score) as f64;
        let rate = (12.5 - headroom / 200.0 * 2.5).max(10.0);
        (rate * 100.0).round() / 100.0
    }
}

impl Default for ThresholdCreditPolicy {
    fn default() -> Self {
        Self::new(PolicySettings::default())
    }
}

impl CreditPolicy for ThresholdCreditPolicy {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn assess(&self, amount: f64, application: &LoanApplication) -> CreditAssessment {
        let credit_score = profile_credit_score(application);
        let ctx = ScoringContext {
            amount,
            credit_score,
            term_months: application.loan_term_months,
        };

        let checks: Vec<PolicyCheck> = self
            .rules
            .iter()
            .map(|rule| {
                let result = rule.check(&ctx);
                PolicyCheck {
                    rule_name: rule.name().to_string(),
                    passed: result.passed,
                    details: result.details,
                }
            })
            .collect();

        let verdict = if checks.iter().all(|c| c.passed) {
            Verdict::Eligible
        } else {
            Verdict::NotEligible
        };

        info!(
            credit_score,
            amount,
            ?verdict,
            rule_count = checks.len(),
            "Credit policy evaluated"
        );

        match verdict {
            Verdict::Eligible => CreditAssessment {
                verdict,
                offered_amount: Some(self.offer_for(amount, credit_score)),
                credit_score: Some(credit_score),
                interest_rate: Some(self.rate_for(credit_score)),
                checks,
            },
            Verdict::NotEligible => CreditAssessment {
                verdict,
                offered_amount: None,
                credit_score: Some(credit_score),
                interest_rate: None,
                checks,
            },
        }
    }
}

//
// ========== Rules ==========
//

pub struct MinimumCreditScoreRule {
    pub min_score: u16,
}

impl PolicyRule for MinimumCreditScoreRule {
    fn name(&self) -> &'static str {
        "minimum_credit_score"
    }

    fn check(&self, ctx: &ScoringContext) -> RuleResult {
        RuleResult {
            passed: ctx.credit_score >= self.min_score,
            details: format!("Credit score {} (minimum {})", ctx.credit_score, self.min_score),
        }
    }
}

pub struct MaximumLoanAmountRule {
    pub max_amount: f64,
}

impl PolicyRule for MaximumLoanAmountRule {
    fn name(&self) -> &'static str {
        "maximum_loan_amount"
    }

    fn check(&self, ctx: &ScoringContext) -> RuleResult {
        RuleResult {
            passed: ctx.amount <= self.max_amount,
            details: format!("Requested {:.0} (maximum {:.0})", ctx.amount, self.max_amount),
        }
    }
}

pub struct MinimumLoanAmountRule {
    pub min_amount: f64,
}

impl PolicyRule for MinimumLoanAmountRule {
    fn name(&self) -> &'static str {
        "minimum_loan_amount"
    }

    fn check(&self, ctx: &ScoringContext) -> RuleResult {
        RuleResult {
            passed: ctx.amount >= self.min_amount,
            details: format!("Requested {:.0} (minimum {:.0})", ctx.amount, self.min_amount),
        }
    }
}

/// Only applies once a term has been given
pub struct LoanTermRangeRule {
    pub min_months: u32,
    pub max_months: u32,
}

impl PolicyRule for LoanTermRangeRule {
    fn name(&self) -> &'static str {
        "loan_term_range"
    }

    fn check(&self, ctx: &ScoringContext) -> RuleResult {
        match ctx.term_months {
            Some(term) => RuleResult {
                passed: (self.min_months..=self.max_months).contains(&term),
                details: format!(
                    "Term {} months (allowed {}-{})",
                    term, self.min_months, self.max_months
                ),
            },
            None => RuleResult {
                passed: true,
                details: "No term requested".to_string(),
            },
        }
    }
}
