//! Environment-driven configuration
//!
//! Binaries call `dotenv::dotenv()` first, then `Settings::from_env()`.

use crate::error::AssistantError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Limits applied by the turn controller
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub max_chain_iterations: u32,
    pub router_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub retrieval_top_k: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            max_chain_iterations: 5,
            router_timeout: Duration::from_secs(120),
            retrieval_timeout: Duration::from_secs(10),
            retrieval_top_k: 1,
        }
    }
}

/// Settings for the LLM-backed router
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: i32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub history_window: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.5,
            max_output_tokens: 1024,
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            history_window: 10,
        }
    }
}

/// Thresholds for the default credit policy
#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub min_credit_score: u16,
    pub max_loan_amount: f64,
    pub min_loan_amount: f64,
    pub min_term_months: u32,
    pub max_term_months: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            min_credit_score: 650,
            max_loan_amount: 500_000.0,
            min_loan_amount: 10_000.0,
            min_term_months: 12,
            max_term_months: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub rag_top_k: usize,
    pub turn: TurnSettings,
    pub llm: LlmSettings,
    pub policy: PolicySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            rag_top_k: 3,
            turn: TurnSettings::default(),
            llm: LlmSettings::default(),
            policy: PolicySettings::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_timeout_secs: u64 = parse_or(&get, "LLM_TIMEOUT_SECS", 120)?;
        let retrieval_timeout_secs: u64 = parse_or(&get, "RETRIEVAL_TIMEOUT_SECS", 10)?;
        let retry_delay_ms: u64 = parse_or(&get, "LLM_RETRY_DELAY_MS", 2000)?;

        let max_chain_iterations: u32 = parse_or(&get, "MAX_CHAIN_ITERATIONS", 5)?;
        if max_chain_iterations == 0 {
            return Err(AssistantError::ConfigError(
                "MAX_CHAIN_ITERATIONS must be at least 1".to_string(),
            ));
        }

        let policy = PolicySettings {
            min_credit_score: parse_or(&get, "MIN_CREDIT_SCORE", defaults.policy.min_credit_score)?,
            max_loan_amount: parse_or(&get, "MAX_LOAN_AMOUNT", defaults.policy.max_loan_amount)?,
            min_loan_amount: parse_or(&get, "MIN_LOAN_AMOUNT", defaults.policy.min_loan_amount)?,
            min_term_months: parse_or(&get, "MIN_LOAN_TERM_MONTHS", defaults.policy.min_term_months)?,
            max_term_months: parse_or(&get, "MAX_LOAN_TERM_MONTHS", defaults.policy.max_term_months)?,
        };
        if policy.min_term_months > policy.max_term_months {
            return Err(AssistantError::ConfigError(format!(
                "MIN_LOAN_TERM_MONTHS ({}) exceeds MAX_LOAN_TERM_MONTHS ({})",
                policy.min_term_months, policy.max_term_months
            )));
        }

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "PORT", defaults.port)?,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            rag_top_k: parse_or(&get, "RAG_TOP_K", defaults.rag_top_k)?,
            turn: TurnSettings {
                max_chain_iterations,
                router_timeout: Duration::from_secs(llm_timeout_secs),
                retrieval_timeout: Duration::from_secs(retrieval_timeout_secs),
                retrieval_top_k: 1,
            },
            llm: LlmSettings {
                api_key: get("GEMINI_API_KEY"),
                model: get("GEMINI_MODEL").unwrap_or(defaults.llm.model),
                temperature: parse_or(&get, "LLM_TEMPERATURE", defaults.llm.temperature)?,
                max_output_tokens: parse_or(&get, "LLM_MAX_TOKENS", defaults.llm.max_output_tokens)?,
                max_retries: parse_or(&get, "LLM_MAX_RETRIES", defaults.llm.max_retries)?,
                retry_delay: Duration::from_millis(retry_delay_ms),
                history_window: parse_or(&get, "ROUTER_HISTORY_WINDOW", defaults.llm.history_window)?,
            },
            policy,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            AssistantError::ConfigError(format!("{}={:?} is invalid: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
