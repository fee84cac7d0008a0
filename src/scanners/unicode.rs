// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Unicode sanitizer.
//
// Reads the raw view of every surface, NFKC-normalizes it, and strips
// invisible and bidi obfuscation carriers into the sanitized view.
// Downstream views are unset so the chain runner rebuilds them from the
// new state.

use std::sync::Arc;

use async_trait::async_trait;
use unicode_normalization::UnicodeNormalization;

use crate::finding::{Finding, FindingKind, RiskLevel, Target};
use crate::normalize::views::{is_bidi_control, is_invisible, TextViewSet, ViewKind};
use crate::normalize::NormalizedInput;
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

pub const NAME: &str = "unicode_sanitizer";

pub struct UnicodeSanitizer;

impl UnicodeSanitizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UnicodeSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

struct SanitizePass {
    sanitized: String,
    removed_invisible: usize,
    removed_bidi: usize,
    nfkc_applied: bool,
}

fn sanitize_pass(raw: &str) -> SanitizePass {
    let nfkc: String = raw.nfkc().collect();
    let nfkc_applied = nfkc != raw;

    let mut removed_invisible = 0usize;
    let mut removed_bidi = 0usize;
    let mut sanitized = String::with_capacity(nfkc.len());
    for c in nfkc.chars() {
        if is_invisible(c) {
            removed_invisible += 1;
        } else if is_bidi_control(c) {
            removed_bidi += 1;
        } else {
            sanitized.push(c);
        }
    }

    SanitizePass {
        sanitized,
        removed_invisible,
        removed_bidi,
        nfkc_applied,
    }
}

impl UnicodeSanitizer {
    fn sanitize_surface(
        &self,
        views: &TextViewSet,
        target: Target,
        request_id: &str,
    ) -> Option<(TextViewSet, Finding)> {
        let pass = sanitize_pass(&views.raw);
        let changed =
            pass.nfkc_applied || pass.removed_invisible > 0 || pass.removed_bidi > 0;
        if !changed {
            return None;
        }

        let rewritten = TextViewSet {
            raw: views.raw.clone(),
            sanitized: Some(pass.sanitized),
            revealed: None,
            skeleton: None,
        };

        let finding = Finding::new(
            FindingKind::Sanitize,
            NAME,
            request_id,
            &target.key(),
            RiskLevel::Low,
            0.1,
            "Stripped invisible or bidi characters during normalization",
            target,
        )
        .with_evidence("removedInvisibleCount", pass.removed_invisible)
        .with_evidence("removedBidiCount", pass.removed_bidi)
        .with_evidence("nfkcApplied", pass.nfkc_applied);

        Some((rewritten, finding))
    }
}

#[async_trait]
impl Scanner for UnicodeSanitizer {
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

        if let Some((set, finding)) = self.sanitize_surface(
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
            if let Some((set, finding)) = self.sanitize_surface(
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
            if let Some((set, finding)) = self.sanitize_surface(
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
