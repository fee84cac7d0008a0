// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Rule pack model, parsing, and validation.
//
// The wire format is a JSON document (`version` + ordered `rules`).
// Pack-level problems (unreadable file, bad JSON, missing version) fail
// the load; a single invalid rule is skipped with a logged warning so
// one typo cannot disable the whole pack.

pub mod loader;
pub mod scanner;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::finding::RiskLevel;
use crate::normalize::views::ViewKind;
use crate::normalize::ChunkSource;

/// Maximum compiled regex size (1 MiB). Prevents pathological patterns
/// from consuming excessive memory at load time.
const MAX_REGEX_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Pack-level load failures. Per-rule problems never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RulePackError {
    #[error("failed to read rule pack: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse rule pack JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule pack validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Raw (wire) types
// ---------------------------------------------------------------------------

/// Wire shape with everything optional, so per-rule validation can skip
/// bad entries instead of failing the whole document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRulePack {
    version: Option<String>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRule {
    id: Option<String>,
    category: Option<String>,
    pattern_type: Option<String>,
    pattern: Option<String>,
    flags: Option<String>,
    negative_pattern: Option<String>,
    risk: Option<String>,
    score: Option<f64>,
    summary: Option<String>,
    scopes: Option<Vec<String>>,
    sources: Option<Vec<String>>,
    views: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Compiled types
// ---------------------------------------------------------------------------

/// Which surface classes a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Prompt,
    PromptChunk,
    Response,
}

/// One validated, compiled rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub category: String,
    pub pattern: String,
    pub regex: Regex,
    pub negative: Option<Regex>,
    pub risk: RiskLevel,
    pub score: f64,
    pub summary: String,
    pub scopes: Vec<RuleScope>,
    pub sources: Vec<ChunkSource>,
    pub views: Vec<ViewKind>,
}

impl CompiledRule {
    pub fn applies_to_scope(&self, scope: RuleScope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn applies_to_source(&self, source: ChunkSource) -> bool {
        self.sources.contains(&source)
    }
}

/// A validated rule pack: the version string plus rules in document
/// order.
#[derive(Debug, Clone, Default)]
pub struct RulePack {
    pub version: String,
    pub rules: Vec<CompiledRule>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Parse and validate a rule pack document. Invalid rules are skipped
/// with a warning; an absent `version` or undecodable JSON fails.
pub fn compile_pack(json: &str) -> Result<RulePack, RulePackError> {
    let raw: RawRulePack = serde_json::from_str(json)?;
    let version = raw
        .version
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RulePackError::Validation("missing \"version\"".to_string()))?;

    let mut rules = Vec::with_capacity(raw.rules.len());
    for (index, raw_rule) in raw.rules.into_iter().enumerate() {
        match compile_rule(raw_rule) {
            Ok(rule) => rules.push(rule),
            Err(reason) => {
                tracing::warn!(rule_index = index, reason = %reason, "skipping invalid rule");
            }
        }
    }

    Ok(RulePack { version, rules })
}

fn compile_rule(raw: RawRule) -> Result<CompiledRule, String> {
    let id = raw
        .id
        .filter(|v| !v.is_empty())
        .ok_or("missing \"id\"")?;

    if let Some(pattern_type) = &raw.pattern_type {
        if pattern_type != "regex" {
            return Err(format!("unsupported patternType \"{pattern_type}\""));
        }
    }

    let pattern = raw
        .pattern
        .filter(|v| !v.is_empty())
        .ok_or("missing \"pattern\"")?;
    let flags = raw.flags.unwrap_or_default();
    let regex = build_regex(&pattern, &flags)?;
    let negative = match &raw.negative_pattern {
        Some(np) if !np.is_empty() => Some(build_regex(np, &flags)?),
        _ => None,
    };

    let risk = match raw.risk.as_deref() {
        Some("low") => RiskLevel::Low,
        Some("medium") => RiskLevel::Medium,
        Some("high") => RiskLevel::High,
        Some("critical") => RiskLevel::Critical,
        Some(other) => return Err(format!("unknown risk \"{other}\"")),
        None => return Err("missing \"risk\"".to_string()),
    };

    let score = raw.score.ok_or("missing \"score\"")?;
    if !(0.0..=1.0).contains(&score) || score.is_nan() {
        return Err(format!("score {score} outside [0, 1]"));
    }

    let scopes = match raw.scopes {
        None => vec![RuleScope::Prompt, RuleScope::PromptChunk, RuleScope::Response],
        Some(names) => {
            let mut scopes = Vec::with_capacity(names.len());
            for name in &names {
                scopes.push(match name.as_str() {
                    "prompt" => RuleScope::Prompt,
                    "promptChunk" => RuleScope::PromptChunk,
                    "response" => RuleScope::Response,
                    other => return Err(format!("unknown scope \"{other}\"")),
                });
            }
            scopes
        }
    };

    let sources = match raw.sources {
        None => vec![ChunkSource::User, ChunkSource::Retrieval, ChunkSource::Tool],
        Some(names) => {
            let mut sources = Vec::with_capacity(names.len());
            for name in &names {
                sources.push(match name.as_str() {
                    "user" => ChunkSource::User,
                    "retrieval" => ChunkSource::Retrieval,
                    "tool" => ChunkSource::Tool,
                    other => return Err(format!("unknown source \"{other}\"")),
                });
            }
            sources
        }
    };

    let views = match raw.views {
        None => ViewKind::PROBE_ORDER.to_vec(),
        Some(names) => {
            let mut views = Vec::with_capacity(names.len());
            for name in &names {
                views.push(match name.as_str() {
                    "raw" => ViewKind::Raw,
                    "sanitized" => ViewKind::Sanitized,
                    "revealed" => ViewKind::Revealed,
                    "skeleton" => ViewKind::Skeleton,
                    other => return Err(format!("unknown view \"{other}\"")),
                });
            }
            views
        }
    };

    Ok(CompiledRule {
        id,
        category: raw.category.unwrap_or_default(),
        pattern,
        regex,
        negative,
        risk,
        score,
        summary: raw.summary.unwrap_or_default(),
        scopes,
        sources,
        views,
    })
}

/// Compile a regex with the documented flag set: `i` (case), `m`
/// (multiline), `s` (dotall), `u` (unicode; always on in this engine).
fn build_regex(pattern: &str, flags: &str) -> Result<Regex, String> {
    let mut builder = RegexBuilder::new(pattern);
    builder.size_limit(MAX_REGEX_SIZE);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'u' => {}
            other => return Err(format!("unknown regex flag \"{other}\"")),
        }
    }
    builder
        .build()
        .map_err(|e| format!("invalid regex \"{pattern}\": {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_json(rules: &str) -> String {
        format!(r#"{{"version": "test.1", "rules": [{rules}]}}"#)
    }

    const VALID_RULE: &str = r#"{
        "id": "r.one", "category": "cat", "patternType": "regex",
        "pattern": "ignore previous", "flags": "i",
        "risk": "high", "score": 0.9, "summary": "s",
        "scopes": ["prompt"], "sources": ["user"], "views": ["raw", "sanitized"]
    }"#;

    #[test]
    fn valid_pack_compiles() {
        let pack = compile_pack(&pack_json(VALID_RULE)).unwrap();
        assert_eq!(pack.version, "test.1");
        assert_eq!(pack.rules.len(), 1);
        let rule = &pack.rules[0];
        assert_eq!(rule.id, "r.one");
        assert!(rule.regex.is_match("IGNORE PREVIOUS"));
        assert_eq!(rule.views, vec![ViewKind::Raw, ViewKind::Sanitized]);
    }

    #[test]
    fn missing_version_fails() {
        let err = compile_pack(r#"{"rules": []}"#).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn bad_json_fails() {
        assert!(matches!(
            compile_pack("not json").unwrap_err(),
            RulePackError::Json(_)
        ));
    }

    #[test]
    fn single_bad_rule_skipped_not_fatal() {
        let rules = format!(
            r#"{{"id": "broken", "pattern": "[unterminated", "risk": "high", "score": 0.5}}, {VALID_RULE}"#
        );
        let pack = compile_pack(&pack_json(&rules)).unwrap();
        assert_eq!(pack.rules.len(), 1);
        assert_eq!(pack.rules[0].id, "r.one");
    }

    #[test]
    fn rule_missing_id_skipped() {
        let rules = r#"{"pattern": "x", "risk": "low", "score": 0.1}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        assert!(pack.rules.is_empty());
    }

    #[test]
    fn score_out_of_range_skipped() {
        let rules = r#"{"id": "r", "pattern": "x", "risk": "low", "score": 1.5}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        assert!(pack.rules.is_empty());
    }

    #[test]
    fn unknown_risk_skipped() {
        let rules = r#"{"id": "r", "pattern": "x", "risk": "severe", "score": 0.5}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        assert!(pack.rules.is_empty());
    }

    #[test]
    fn unknown_flag_skipped() {
        let rules = r#"{"id": "r", "pattern": "x", "flags": "ix", "risk": "low", "score": 0.5}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        assert!(pack.rules.is_empty());
    }

    #[test]
    fn defaults_fill_scopes_sources_views() {
        let rules = r#"{"id": "r", "pattern": "x", "risk": "low", "score": 0.5}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        let rule = &pack.rules[0];
        assert_eq!(rule.scopes.len(), 3);
        assert_eq!(rule.sources.len(), 3);
        assert_eq!(rule.views.len(), 4);
        assert_eq!(rule.category, "");
    }

    #[test]
    fn negative_pattern_compiled_with_same_flags() {
        let rules = r#"{
            "id": "r", "pattern": "ignore", "negativePattern": "NEVER ignore",
            "flags": "i", "risk": "low", "score": 0.5
        }"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        let negative = pack.rules[0].negative.as_ref().unwrap();
        assert!(negative.is_match("never IGNORE"));
    }

    #[test]
    fn rule_order_preserved() {
        let rules = r#"{"id": "a", "pattern": "x", "risk": "low", "score": 0.1},
                       {"id": "b", "pattern": "y", "risk": "low", "score": 0.1}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        assert_eq!(pack.rules[0].id, "a");
        assert_eq!(pack.rules[1].id, "b");
    }

    #[test]
    fn multiline_and_dotall_flags_apply() {
        let rules = r#"{"id": "r", "pattern": "^secret.end$", "flags": "ms", "risk": "low", "score": 0.2}"#;
        let pack = compile_pack(&pack_json(rules)).unwrap();
        assert!(pack.rules[0].regex.is_match("before\nsecret\nend\nafter"));
    }
}
