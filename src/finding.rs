// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Findings -- the normalized observations scanners emit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::normalize::views::ViewKind;
use crate::normalize::ChunkSource;

// ---------------------------------------------------------------------------
// Risk & kind
// ---------------------------------------------------------------------------

/// Risk carried by a finding. Ordered: `None < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage class produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Sanitize,
    Enrich,
    Detect,
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The surface class a finding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetField {
    Prompt,
    Response,
    PromptChunk,
}

impl TargetField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::Prompt => "prompt",
            TargetField::Response => "response",
            TargetField::PromptChunk => "promptChunk",
        }
    }
}

/// Location of a finding: which surface, which view, and for chunks the
/// source class and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub field: TargetField,
    pub view: ViewKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ChunkSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl Target {
    pub fn prompt(view: ViewKind) -> Self {
        Self {
            field: TargetField::Prompt,
            view,
            source: Some(ChunkSource::User),
            chunk_index: None,
        }
    }

    pub fn chunk(view: ViewKind, source: ChunkSource, chunk_index: usize) -> Self {
        Self {
            field: TargetField::PromptChunk,
            view,
            source: Some(source),
            chunk_index: Some(chunk_index),
        }
    }

    pub fn response(view: ViewKind) -> Self {
        Self {
            field: TargetField::Response,
            view,
            source: None,
            chunk_index: None,
        }
    }

    /// A stable location key, used in finding ids and reason strings.
    pub fn key(&self) -> String {
        match self.field {
            TargetField::Prompt => "prompt".to_string(),
            TargetField::Response => "response".to_string(),
            TargetField::PromptChunk => {
                format!("chunk:{}", self.chunk_index.unwrap_or(0))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// A single piece of evidence emitted by a scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Content-addressed id: identical triggering context in identical
    /// input yields the identical id, across processes.
    pub id: String,
    pub kind: FindingKind,
    pub scanner: String,
    /// Clamped to [0, 1].
    pub score: f64,
    pub risk: RiskLevel,
    pub tags: BTreeSet<String>,
    pub summary: String,
    pub target: Target,
    /// Open string-keyed map. Well-known keys: `ruleId`, `category`,
    /// `matchedViews`, `snippet`, plus scanner-specific counters.
    pub evidence: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    /// Build a finding with a derived stable id and clamped score.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: FindingKind,
        scanner: &str,
        request_id: &str,
        local_key: &str,
        risk: RiskLevel,
        score: f64,
        summary: impl Into<String>,
        target: Target,
    ) -> Self {
        Self {
            id: finding_id(scanner, request_id, local_key),
            kind,
            scanner: scanner.to_string(),
            score: clamp_score(score),
            risk,
            tags: BTreeSet::new(),
            summary: summary.into(),
            target,
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_evidence(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }
}

/// Derive the stable finding id from `(scanner, requestId, localKey)`.
pub fn finding_id(scanner: &str, request_id: &str, local_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scanner.as_bytes());
    hasher.update([0x1f]);
    hasher.update(request_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(local_key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Clamp a score to [0.0, 1.0]; NaN clamps to 0.0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
