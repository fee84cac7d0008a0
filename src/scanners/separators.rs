// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Separator-collapse sanitizer.
//
// Collapses inter-letter separator obfuscation such as `h.t.t.p` or
// `i|g|n|o|r|e` in the sanitized view. Only runs of single letters with
// at least three separators collapse, so ordinary punctuation, version
// numbers, and abbreviations survive.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::finding::{Finding, FindingKind, RiskLevel, Target};
use crate::normalize::views::{TextViewSet, ViewKind};
use crate::normalize::NormalizedInput;
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

pub const NAME: &str = "separator_collapse";

/// Single letters joined by the separator class, three or more times.
fn run_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z](?:[|._+\-][A-Za-z]){3,}").expect("separator run pattern")
    })
}

pub struct SeparatorCollapse;

impl SeparatorCollapse {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SeparatorCollapse {
    fn default() -> Self {
        Self::new()
    }
}

fn collapse(text: &str) -> (String, usize, Option<String>) {
    let mut runs = 0usize;
    let mut first: Option<String> = None;
    let collapsed = run_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            runs += 1;
            let joined: String = caps[0]
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect();
            if first.is_none() {
                first = Some(format!("{} -> {}", &caps[0], joined));
            }
            joined
        })
        .into_owned();
    (collapsed, runs, first)
}

impl SeparatorCollapse {
    fn collapse_surface(
        &self,
        views: &TextViewSet,
        target: Target,
        request_id: &str,
    ) -> Option<(TextViewSet, Finding)> {
        let sanitized = views.view(ViewKind::Sanitized);
        let (collapsed, runs, example) = collapse(sanitized);
        if runs == 0 {
            return None;
        }

        // Downstream views are unset so the chain runner rebuilds them
        // instead of carrying pre-collapse text forward.
        let rewritten = TextViewSet {
            raw: views.raw.clone(),
            sanitized: Some(collapsed),
            revealed: None,
            skeleton: None,
        };

        let finding = Finding::new(
            FindingKind::Sanitize,
            NAME,
            request_id,
            &target.key(),
            RiskLevel::Low,
            0.2,
            "Collapsed inter-letter separator obfuscation",
            target,
        )
        .with_evidence("collapsedRuns", runs)
        .with_evidence("example", example.unwrap_or_default());

        Some((rewritten, finding))
    }
}

#[async_trait]
impl Scanner for SeparatorCollapse {
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
        let mut next = input.clone();
        let mut findings = Vec::new();
        let mut changed = false;

        if let Some((set, finding)) = self.collapse_surface(
            &input.views.prompt,
            Target::prompt(ViewKind::Sanitized),
            &ctx.request_id,
        ) {
            next.views.prompt = Arc::new(set);
            findings.push(finding);
            changed = true;
        }

        for (i, chunk) in input.views.chunks.iter().enumerate() {
            let source = input.canonical.prompt_chunks_canonical[i].source;
            if let Some((set, finding)) = self.collapse_surface(
                chunk,
                Target::chunk(ViewKind::Sanitized, source, i),
                &ctx.request_id,
            ) {
                next.views.chunks[i] = Arc::new(set);
                findings.push(finding);
                changed = true;
            }
        }

        if let Some(response) = &input.views.response {
            if let Some((set, finding)) = self.collapse_surface(
                response,
                Target::response(ViewKind::Sanitized),
                &ctx.request_id,
            ) {
                next.views.response = Some(Arc::new(set));
                findings.push(finding);
                changed = true;
            }
        }

        if changed {
            Ok(ScanOutcome::rewritten(next, findings))
        } else {
            Ok(ScanOutcome::unchanged())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
