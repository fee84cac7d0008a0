// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Tool-argument canonicalizer.
//
// Walks the tool-call argument trees, NFKC-normalizes every string and
// strips invisible/bidi carriers, then swaps `canonical.toolCallsJson`
// for the cleaned rendering when anything changed. The raw request is
// never touched. The walk is bounded by a node budget; exhaustion is
// reported, not an error.

use async_trait::async_trait;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::canonical::canonical_string;
use crate::finding::{Finding, FindingKind, RiskLevel, Target, TargetField};
use crate::normalize::views::{is_bidi_control, is_invisible, ViewKind};
use crate::normalize::{ChunkSource, NormalizedInput};
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

pub const NAME: &str = "tool_args_canonicalizer";

/// Maximum nodes visited across all tool-call argument trees.
pub const DEFAULT_NODE_BUDGET: usize = 20_000;

pub struct ToolArgsCanonicalizer {
    node_budget: usize,
}

impl ToolArgsCanonicalizer {
    pub fn new() -> Self {
        Self {
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }

    pub fn with_node_budget(node_budget: usize) -> Self {
        Self { node_budget }
    }
}

impl Default for ToolArgsCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

struct WalkState {
    budget: usize,
    visited: usize,
    changed_strings: usize,
    exceeded: bool,
}

fn clean_string(s: &str) -> String {
    s.nfkc()
        .filter(|c| !is_invisible(*c) && !is_bidi_control(*c))
        .collect()
}

fn clean_value(value: &Value, state: &mut WalkState) -> Value {
    if state.visited >= state.budget {
        state.exceeded = true;
        return value.clone();
    }
    state.visited += 1;

    match value {
        Value::String(s) => {
            let cleaned = clean_string(s);
            if cleaned != *s {
                state.changed_strings += 1;
            }
            Value::String(cleaned)
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(|v| clean_value(v, state)).collect())
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), clean_value(v, state));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[async_trait]
impl Scanner for ToolArgsCanonicalizer {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Sanitize
    }

    async fn run(
        &self,
        input: &NormalizedInput,
        ctx: &ScanContext,
    ) -> Result<ScanOutcome, ScanError> {
        if !input.features.has_tool_calls {
            return Ok(ScanOutcome::unchanged());
        }

        let raw_value =
            serde_json::to_value(&input.raw.tool_calls).unwrap_or(Value::Null);
        let mut state = WalkState {
            budget: self.node_budget,
            visited: 0,
            changed_strings: 0,
            exceeded: false,
        };
        let cleaned = clean_value(&raw_value, &mut state);

        if state.changed_strings == 0 && !state.exceeded {
            return Ok(ScanOutcome::unchanged());
        }

        let mut findings = Vec::new();
        let target = Target {
            field: TargetField::PromptChunk,
            view: ViewKind::Sanitized,
            source: Some(ChunkSource::Tool),
            chunk_index: None,
        };
        findings.push(
            Finding::new(
                FindingKind::Sanitize,
                NAME,
                &ctx.request_id,
                "toolCalls",
                RiskLevel::Low,
                0.2,
                "Normalized obfuscated strings inside tool-call arguments",
                target,
            )
            .with_evidence("changedStrings", state.changed_strings)
            .with_evidence("visitedNodes", state.visited)
            .with_evidence("maxNodesExceeded", state.exceeded),
        );

        if state.changed_strings == 0 {
            // Budget ran out before any change: report, keep canonical form.
            return Ok(ScanOutcome::found(findings));
        }

        let mut next = input.clone();
        next.canonical.tool_calls_json = canonical_string(&cleaned);
        Ok(ScanOutcome::rewritten(next, findings))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::request::{AuditRequest, ToolCallRecord};
    use crate::scanners::ScanMode;
    use serde_json::json;

    fn ctx() -> ScanContext {
        ScanContext {
            mode: ScanMode::Runtime,
            request_id: "tool-args-test".to_string(),
        }
    }

    fn request_with_args(args: Value) -> AuditRequest {
        AuditRequest {
            request_id: "tool-args-test".to_string(),
            timestamp: 1,
            user_prompt: "run it".to_string(),
            retrieval_docs: vec![],
            tool_calls: vec![ToolCallRecord {
                tool_name: "fetch".to_string(),
                args,
            }],
            tool_results: vec![],
            response_text: None,
        }
    }

    #[tokio::test]
    async fn cleans_obfuscated_strings_and_swaps_canonical_json() {
        let input = normalize(request_with_args(
            json!({"url": "http://ex\u{200B}ample.com", "depth": 2}),
        ));
        let scanner = ToolArgsCanonicalizer::new();
        let outcome = scanner.run(&input, &ctx()).await.unwrap();

        let next = outcome.input.unwrap();
        assert!(next.canonical.tool_calls_json.contains("http://example.com"));
        // The raw request is untouched.
        assert!(next.raw.tool_calls[0].args["url"]
            .as_str()
            .unwrap()
            .contains('\u{200B}'));

        let finding = &outcome.findings[0];
        assert_eq!(finding.evidence["changedStrings"], 1);
        assert_eq!(finding.evidence["maxNodesExceeded"], false);
    }

    #[tokio::test]
    async fn clean_args_leave_input_unchanged() {
        let input = normalize(request_with_args(json!({"url": "http://example.com"})));
        let outcome = ToolArgsCanonicalizer::new().run(&input, &ctx()).await.unwrap();
        assert!(outcome.input.is_none());
        assert!(outcome.findings.is_empty());
    }

    #[tokio::test]
    async fn nested_strings_cleaned() {
        let input = normalize(request_with_args(
            json!({"headers": {"x": ["a\u{202E}b", "ok"]}}),
        ));
        let outcome = ToolArgsCanonicalizer::new().run(&input, &ctx()).await.unwrap();
        let next = outcome.input.unwrap();
        assert!(next.canonical.tool_calls_json.contains("\"ab\""));
    }

    #[tokio::test]
    async fn node_budget_exhaustion_flagged() {
        let wide: Vec<Value> = (0..100).map(|i| json!(format!("v{i}"))).collect();
        let input = normalize(request_with_args(json!({ "items": wide })));
        let scanner = ToolArgsCanonicalizer::with_node_budget(5);
        let outcome = scanner.run(&input, &ctx()).await.unwrap();

        let finding = &outcome.findings[0];
        assert_eq!(finding.evidence["maxNodesExceeded"], true);
        // No string changed, so the canonical form is kept.
        assert!(outcome.input.is_none());
    }

    #[tokio::test]
    async fn no_tool_calls_is_a_noop() {
        let mut req = request_with_args(json!({}));
        req.tool_calls.clear();
        let input = normalize(req);
        let outcome = ToolArgsCanonicalizer::new().run(&input, &ctx()).await.unwrap();
        assert!(outcome.input.is_none());
        assert!(outcome.findings.is_empty());
    }
}
