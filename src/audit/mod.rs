//! Turn audit log
//!
//! Every turn is recorded, committed or rolled back, together with a hash of
//! the application state it left behind.

use crate::models::{LoanApplication, SessionId};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Committed,
    RolledBack { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub outcome: TurnOutcome,
    pub iterations: u32,
    pub tools_invoked: Vec<String>,
    /// SHA-256 of the application as it stands after the turn
    pub state_hash: String,
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(
        session_id: SessionId,
        outcome: TurnOutcome,
        iterations: u32,
        tools_invoked: Vec<String>,
        application: &LoanApplication,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            session_id,
            outcome,
            iterations,
            tools_invoked,
            state_hash: compute_state_hash(application),
            created_at: Utc::now(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.outcome == TurnOutcome::Committed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditTotals {
    pub committed: usize,
    pub rolled_back: usize,
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, TurnRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let turn_id = record.turn_id;
        let mut records = self.records.write().await;
        records.insert(turn_id, record);
        Ok(turn_id)
    }

    pub async fn get(&self, turn_id: Uuid) -> Result<Option<TurnRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&turn_id).cloned())
    }

    /// Records for one session, oldest first
    pub async fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<TurnRecord>> {
        let records = self.records.read().await;

        let mut items: Vec<TurnRecord> = records
            .values()
            .filter(|record| &record.session_id == session_id)
            .cloned()
            .collect();

        items.sort_by_key(|record| record.created_at);

        Ok(items)
    }

    /// Drop every record of a session; returns how many were removed
    pub async fn remove_session(&self, session_id: &SessionId) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| &record.session_id != session_id);
        Ok(before - records.len())
    }

    /// Committed and rolled back turn counts across all sessions
    pub async fn totals(&self) -> Result<AuditTotals> {
        let records = self.records.read().await;
        let committed = records.values().filter(|record| record.is_committed()).count();
        Ok(AuditTotals {
            committed,
            rolled_back: records.len() - committed,
        })
    }

    /// Check that `application` is the state the turn recorded
    pub async fn verify_integrity(&self, turn_id: Uuid, application: &LoanApplication) -> Result<bool> {
        let records = self.records.read().await;

        Ok(records
            .get(&turn_id)
            .map(|record| record.state_hash == compute_state_hash(application))
            .unwrap_or(false))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the application, streamed straight into the hasher
pub fn compute_state_hash(application: &LoanApplication) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), application).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
