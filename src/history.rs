// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Multi-turn history store.
//
// The narrow read/append interface the audit core needs; richer storage
// backends live outside the core. `append` is atomic per session.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::finding::RiskLevel;
use crate::policy::PolicyAction;

/// The per-turn record the auditor appends after each decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub request_id: String,
    pub timestamp: i64,
    pub action: PolicyAction,
    pub risk: RiskLevel,
    pub finding_count: usize,
}

/// Narrow per-session store.
pub trait HistoryStore: Send + Sync {
    /// All turns recorded for a session, in append order.
    fn read(&self, session_id: &str) -> Vec<TurnRecord>;

    /// Append one turn. Must be atomic per session.
    fn append(&self, session_id: &str, record: TurnRecord);
}

/// In-memory store; a mutex over the session map keeps appends atomic.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: Mutex<HashMap<String, Vec<TurnRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn read(&self, session_id: &str) -> Vec<TurnRecord> {
        let sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    fn append(&self, session_id: &str, record: TurnRecord) {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.entry(session_id.to_string()).or_default().push(record);
    }
}
