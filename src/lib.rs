//! Loan Origination Assistant
//!
//! A turn-based dialogue state machine that walks an applicant through a
//! personal loan:
//! - Collects amount, purpose, term and name
//! - Verifies identity (KYC) against the recorded name
//! - Evaluates creditworthiness with a pluggable deterministic policy
//! - Answers product questions from a knowledge base
//! - Issues a sanction letter once KYC and eligibility both hold
//!
//! TURN LOOP:
//! HUMAN → ROUTE → [TOOLS → ROUTE]* → REPLY → COMMIT (or ROLLBACK)

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod gemini;
pub mod models;
pub mod policy;
pub mod retrieval;
pub mod router;
pub mod state;
pub mod tools;

pub use error::{AssistantError, Result};

// Re-export common types
pub use agent::{SessionManager, TurnController, TurnReply};
pub use models::*;
