// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Contradiction checks.
//
// Compares the response against the recorded tool activity of the same
// turn. A response that narrates an outcome the tool results contradict
// is a tampering or hallucination signal for downstream consumers.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::finding::{Finding, FindingKind, RiskLevel, Target};
use crate::normalize::views::ViewKind;
use crate::normalize::NormalizedInput;
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

pub const NAME: &str = "contradiction_check";

fn success_claim() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:succe(?:ss(?:fully)?|eded)|completed(?:\s+successfully)?|no\s+errors?|everything\s+worked|without\s+(?:any\s+)?(?:errors?|issues?))\b",
        )
        .expect("success claim pattern")
    })
}

fn tool_denial() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:didn't|did\s+not|never)\s+(?:use|call|run|invoke)\s+(?:any\s+)?tools?\b")
            .expect("tool denial pattern")
    })
}

pub struct ContradictionCheck;

impl ContradictionCheck {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ContradictionCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for ContradictionCheck {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(
        &self,
        input: &NormalizedInput,
        ctx: &ScanContext,
    ) -> Result<ScanOutcome, ScanError> {
        if !input.features.has_response {
            return Ok(ScanOutcome::unchanged());
        }
        let Some(response) = &input.views.response else {
            return Ok(ScanOutcome::unchanged());
        };
        let text = response.view(ViewKind::Sanitized);

        let mut findings = Vec::new();

        // Success narration while a tool result failed.
        if input.features.has_tool_results {
            let failed: Vec<&str> = input
                .raw
                .tool_results
                .iter()
                .filter(|r| !r.ok)
                .map(|r| r.tool_name.as_str())
                .collect();
            if !failed.is_empty() {
                if let Some(m) = success_claim().find(text) {
                    findings.push(
                        Finding::new(
                            FindingKind::Detect,
                            NAME,
                            &ctx.request_id,
                            "success_vs_failure",
                            RiskLevel::Medium,
                            0.6,
                            "Response claims success while a tool result failed",
                            Target::response(ViewKind::Sanitized),
                        )
                        .with_tag("contradiction")
                        .with_evidence("category", "response_contradiction")
                        .with_evidence("claim", m.as_str())
                        .with_evidence(
                            "failedTools",
                            failed
                                .iter()
                                .map(|t| serde_json::Value::String((*t).to_string()))
                                .collect::<Vec<_>>(),
                        ),
                    );
                }
            }
        }

        // Denial of tool use while tool calls were recorded.
        if input.features.has_tool_calls {
            if let Some(m) = tool_denial().find(text) {
                let called: Vec<serde_json::Value> = input
                    .raw
                    .tool_calls
                    .iter()
                    .map(|c| serde_json::Value::String(c.tool_name.clone()))
                    .collect();
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &ctx.request_id,
                        "tool_denial",
                        RiskLevel::Medium,
                        0.6,
                        "Response denies tool use despite recorded tool calls",
                        Target::response(ViewKind::Sanitized),
                    )
                    .with_tag("contradiction")
                    .with_evidence("category", "response_contradiction")
                    .with_evidence("claim", m.as_str())
                    .with_evidence("toolCalls", called),
                );
            }
        }

        Ok(ScanOutcome::found(findings))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
