// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// L3 policy evaluation.
//
// A pure reduction from the finding stream to a decision. Policy never
// fails; it always returns a decision, even over an empty stream.

use serde::{Deserialize, Serialize};

use crate::finding::{Finding, FindingKind, RiskLevel};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The recommended handling for the audited turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    AllowWithWarning,
    Challenge,
    Block,
}

/// The decision produced by `evaluate_policy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub risk: RiskLevel,
    /// In [0, 1]: mean of the top-K detect scores, capped at 1.
    pub confidence: f64,
    /// `"<scanner>/<category-or-ruleId>@<field>"`, stable-sorted by
    /// (risk desc, score desc, emission order).
    pub reasons: Vec<String>,
}

/// Evaluation knobs. The `high` action is configurable; everything else
/// is fixed by the risk table.
#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    /// Action for peak risk `high`. `Challenge` by default; deployments
    /// may harden to `Block`.
    pub high_action: PolicyAction,
    /// How many top detect scores feed confidence.
    pub top_k: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            high_action: PolicyAction::Challenge,
            top_k: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Reduce findings to a policy decision.
pub fn evaluate_policy(findings: &[Finding], config: &PolicyConfig) -> PolicyDecision {
    let detects: Vec<(usize, &Finding)> = findings
        .iter()
        .enumerate()
        .filter(|(_, f)| f.kind == FindingKind::Detect)
        .collect();

    let risk = detects
        .iter()
        .map(|(_, f)| f.risk)
        .max()
        .unwrap_or(RiskLevel::None);

    let action = match risk {
        RiskLevel::Critical => PolicyAction::Block,
        RiskLevel::High => config.high_action,
        RiskLevel::Medium => PolicyAction::AllowWithWarning,
        RiskLevel::Low | RiskLevel::None => PolicyAction::Allow,
    };

    let confidence = if detects.is_empty() || config.top_k == 0 {
        0.0
    } else {
        let mut scores: Vec<f64> = detects.iter().map(|(_, f)| f.score).collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let sum: f64 = scores.iter().take(config.top_k).sum();
        (sum / config.top_k as f64).min(1.0)
    };

    // Detect findings always appear in reasons; sanitize/enrich findings
    // join only when explicitly flagged for surfacing. They never drive
    // the action.
    let mut reason_entries: Vec<(usize, &Finding)> = detects.clone();
    reason_entries.extend(findings.iter().enumerate().filter(|(_, f)| {
        f.kind != FindingKind::Detect
            && f.evidence.get("surface") == Some(&serde_json::Value::Bool(true))
    }));

    reason_entries.sort_by(|(ia, a), (ib, b)| {
        b.risk
            .cmp(&a.risk)
            .then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| ia.cmp(ib))
    });

    let reasons = reason_entries
        .iter()
        .map(|(_, f)| reason_of(f))
        .collect();

    PolicyDecision {
        action,
        risk,
        confidence,
        reasons,
    }
}

/// `"<scanner>/<category-or-ruleId>@<field>"`.
fn reason_of(finding: &Finding) -> String {
    let label = finding
        .evidence
        .get("category")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| finding.evidence.get("ruleId").and_then(|v| v.as_str()))
        .unwrap_or(finding.scanner.as_str());
    format!(
        "{}/{}@{}",
        finding.scanner,
        label,
        finding.target.field.as_str()
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
