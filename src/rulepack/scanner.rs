// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Rule pack detector.
//
// Evaluates every applicable rule against every allowed view of every
// in-scope surface. One finding per (rule, target) with the union of
// matched views; the emitted target view is the preferred (most
// processed) matched view. Rule order in the pack is preserved in the
// finding stream; within one rule, targets run prompt → chunks →
// response.

use async_trait::async_trait;

use crate::finding::{Finding, FindingKind, Target, TargetField};
use crate::normalize::views::{TextViewSet, ViewKind};
use crate::normalize::{ChunkSource, NormalizedInput};
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

use super::loader::{LoaderOptions, PackSource, RulePackHandle, RulePackLoader};
use super::{CompiledRule, RulePackError, RuleScope};

pub const NAME: &str = "rule_pack";

const SNIPPET_CHARS: usize = 120;

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct RulePackScanner {
    handle: RulePackHandle,
    loader: Option<RulePackLoader>,
}

impl RulePackScanner {
    /// Use the packaged default pack.
    pub fn with_default_pack() -> Self {
        let loader = RulePackLoader::from_default_pack();
        Self {
            handle: loader.handle(),
            loader: Some(loader),
        }
    }

    /// Load from a source, with optional hot reload.
    pub fn from_source(
        source: Box<dyn PackSource>,
        options: LoaderOptions,
    ) -> Result<Self, RulePackError> {
        let loader = RulePackLoader::load(source, options)?;
        Ok(Self {
            handle: loader.handle(),
            loader: Some(loader),
        })
    }

    /// Share an externally owned pack slot.
    pub fn with_handle(handle: RulePackHandle) -> Self {
        Self {
            handle,
            loader: None,
        }
    }

    pub fn handle(&self) -> RulePackHandle {
        self.handle.clone()
    }
}

// ---------------------------------------------------------------------------
// Target list
// ---------------------------------------------------------------------------

struct SurfaceTarget<'a> {
    scope: RuleScope,
    field: TargetField,
    source: Option<ChunkSource>,
    chunk_index: Option<usize>,
    views: &'a TextViewSet,
}

fn build_targets(input: &NormalizedInput) -> Vec<SurfaceTarget<'_>> {
    let mut targets = Vec::with_capacity(input.views.chunks.len() + 2);

    targets.push(SurfaceTarget {
        scope: RuleScope::Prompt,
        field: TargetField::Prompt,
        source: Some(ChunkSource::User),
        chunk_index: None,
        views: &input.views.prompt,
    });

    for (i, chunk) in input.views.chunks.iter().enumerate() {
        targets.push(SurfaceTarget {
            scope: RuleScope::PromptChunk,
            field: TargetField::PromptChunk,
            source: Some(input.canonical.prompt_chunks_canonical[i].source),
            chunk_index: Some(i),
            views: chunk,
        });
    }

    if let Some(response) = &input.views.response {
        targets.push(SurfaceTarget {
            scope: RuleScope::Response,
            field: TargetField::Response,
            source: None,
            chunk_index: None,
            views: response,
        });
    }

    targets
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

fn evaluate_rule(
    rule: &CompiledRule,
    target: &SurfaceTarget<'_>,
    request_id: &str,
) -> Option<Finding> {
    if !rule.applies_to_scope(target.scope) {
        return None;
    }
    if let Some(source) = target.source {
        if target.scope == RuleScope::PromptChunk && !rule.applies_to_source(source) {
            return None;
        }
    }

    let mut matched_views: Vec<ViewKind> = Vec::new();
    let mut snippet: Option<String> = None;

    for view in ViewKind::PROBE_ORDER {
        if !rule.views.contains(&view) {
            continue;
        }
        let text = target.views.view(view);
        let Some(m) = rule.regex.find(text) else {
            continue;
        };
        if let Some(negative) = &rule.negative {
            if negative.is_match(text) {
                continue;
            }
        }
        matched_views.push(view);
        if snippet.is_none() {
            snippet = Some(clip(m.as_str()));
        }
    }

    let preferred = ViewKind::preferred_of(&matched_views)?;

    let finding_target = Target {
        field: target.field,
        view: preferred,
        source: target.source,
        chunk_index: target.chunk_index,
    };
    let local_key = format!("{}:{}", rule.id, finding_target.key());

    let mut finding = Finding::new(
        FindingKind::Detect,
        NAME,
        request_id,
        &local_key,
        rule.risk,
        rule.score,
        rule.summary.clone(),
        finding_target,
    )
    .with_evidence("ruleId", rule.id.clone())
    .with_evidence("category", rule.category.clone())
    .with_evidence(
        "matchedViews",
        matched_views
            .iter()
            .map(|v| serde_json::Value::String(v.as_str().to_string()))
            .collect::<Vec<_>>(),
    )
    .with_evidence("snippet", snippet.unwrap_or_default());
    if !rule.category.is_empty() {
        finding = finding.with_tag(rule.category.clone());
    }
    Some(finding)
}

fn clip(s: &str) -> String {
    s.chars().take(SNIPPET_CHARS).collect()
}

#[async_trait]
impl Scanner for RulePackScanner {
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
        // Snapshot: a concurrent hot reload must not change the rule set
        // mid-evaluation.
        let pack = self.handle.current();
        let targets = build_targets(input);

        let mut findings = Vec::new();
        for rule in &pack.rules {
            for target in &targets {
                if let Some(finding) = evaluate_rule(rule, target, &ctx.request_id) {
                    findings.push(finding);
                }
            }
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            pack_version = %pack.version,
            findings = findings.len(),
            "rule pack evaluated"
        );

        Ok(ScanOutcome::found(findings))
    }

    async fn close(&self) {
        if let Some(loader) = &self.loader {
            loader.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
