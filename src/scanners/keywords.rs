// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Keyword injection detector.
//
// A fixed, curated set of override and role-confusion phrases checked
// against the sanitized and revealed views of every surface. Coarser
// than the rule pack but independent of it, so a missing or broken pack
// still leaves a baseline injection signal.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::finding::{Finding, FindingKind, RiskLevel, Target, TargetField};
use crate::normalize::views::{TextViewSet, ViewKind};
use crate::normalize::{ChunkSource, NormalizedInput};
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

pub const NAME: &str = "keyword_injection";

/// Checked views, in probe order.
const CHECKED_VIEWS: [ViewKind; 2] = [ViewKind::Sanitized, ViewKind::Revealed];

struct Phrase {
    label: &'static str,
    regex: Regex,
}

fn phrases() -> &'static [Phrase] {
    static PHRASES: OnceLock<Vec<Phrase>> = OnceLock::new();
    PHRASES.get_or_init(|| {
        let compile = |label: &'static str, pattern: &str| Phrase {
            label,
            regex: Regex::new(pattern).expect("keyword phrase pattern"),
        };
        vec![
            compile(
                "instruction_override",
                r"(?i)\b(?:ignore|disregard|forget)\b.{0,24}\b(?:previous|prior|above|earlier)\b.{0,24}\b(?:instructions|directives|rules|prompts?)\b",
            ),
            compile("persona_swap", r"(?i)\byou are n(?:ow|o longer)\b"),
            compile("mode_toggle", r"(?i)\b(?:developer|dan|god|debug)\s+mode\b"),
            compile(
                "guardrail_removal",
                r"(?i)\b(?:disable|remove|bypass)\b.{0,24}\b(?:safety|filters?|guardrails?|restrictions)\b",
            ),
            compile(
                "prompt_extraction",
                r"(?i)\b(?:reveal|repeat|print|show)\b.{0,24}\bsystem prompt\b",
            ),
        ]
    })
}

pub struct KeywordInjection;

impl KeywordInjection {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KeywordInjection {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordInjection {
    fn scan_surface(
        &self,
        views: &TextViewSet,
        field: TargetField,
        source: Option<ChunkSource>,
        chunk_index: Option<usize>,
        request_id: &str,
    ) -> Option<Finding> {
        let mut matched_phrases: Vec<&str> = Vec::new();
        let mut matched_views: Vec<ViewKind> = Vec::new();

        for view in CHECKED_VIEWS {
            let text = views.view(view);
            let mut any = false;
            for phrase in phrases() {
                if phrase.regex.is_match(text) {
                    any = true;
                    if !matched_phrases.contains(&phrase.label) {
                        matched_phrases.push(phrase.label);
                    }
                }
            }
            if any {
                matched_views.push(view);
            }
        }

        if matched_phrases.is_empty() {
            return None;
        }

        let view = ViewKind::preferred_of(&matched_views).unwrap_or(ViewKind::Sanitized);
        let target = Target {
            field,
            view,
            source,
            chunk_index,
        };
        let score = 0.4 + 0.15 * matched_phrases.len() as f64;

        let mut finding = Finding::new(
            FindingKind::Detect,
            NAME,
            request_id,
            &target.key(),
            RiskLevel::Medium,
            score,
            "Injection keyword phrases present",
            target,
        )
        .with_evidence("category", "keyword_injection")
        .with_evidence(
            "phrases",
            matched_phrases
                .iter()
                .map(|p| serde_json::Value::String((*p).to_string()))
                .collect::<Vec<_>>(),
        )
        .with_evidence(
            "matchedViews",
            matched_views
                .iter()
                .map(|v| serde_json::Value::String(v.as_str().to_string()))
                .collect::<Vec<_>>(),
        );
        finding = finding.with_tag("keyword_injection");
        Some(finding)
    }
}

#[async_trait]
impl Scanner for KeywordInjection {
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
        let mut findings = Vec::new();

        if let Some(f) = self.scan_surface(
            &input.views.prompt,
            TargetField::Prompt,
            Some(ChunkSource::User),
            None,
            &ctx.request_id,
        ) {
            findings.push(f);
        }

        for (i, chunk) in input.views.chunks.iter().enumerate() {
            let source = input.canonical.prompt_chunks_canonical[i].source;
            if let Some(f) = self.scan_surface(
                chunk,
                TargetField::PromptChunk,
                Some(source),
                Some(i),
                &ctx.request_id,
            ) {
                findings.push(f);
            }
        }

        if let Some(response) = &input.views.response {
            if let Some(f) = self.scan_surface(
                response,
                TargetField::Response,
                None,
                None,
                &ctx.request_id,
            ) {
                findings.push(f);
            }
        }

        Ok(ScanOutcome::found(findings))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
