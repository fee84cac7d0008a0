// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Scanner framework.
//
// A scanner is one stage of the L2 chain: sanitizers rewrite views,
// enrichers compute derived views, detectors emit findings. Scanners
// never mutate the input they receive; a rewrite is expressed by
// returning a new `NormalizedInput` in the outcome.

pub mod chain;
pub mod contradiction;
pub mod hidden_tags;
pub mod keywords;
pub mod separators;
pub mod skeleton;
pub mod tool_args;
pub mod tool_boundary;
pub mod unicode;

use async_trait::async_trait;

use crate::finding::{Finding, FindingKind};
use crate::normalize::NormalizedInput;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Stage class of a scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Sanitize,
    Enrich,
    Detect,
}

impl ScannerKind {
    pub fn finding_kind(&self) -> FindingKind {
        match self {
            ScannerKind::Sanitize => FindingKind::Sanitize,
            ScannerKind::Enrich => FindingKind::Enrich,
            ScannerKind::Detect => FindingKind::Detect,
        }
    }
}

/// Informational execution mode, passed to each scanner via context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Runtime,
    Audit,
}

/// Per-audit context handed to every scanner.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub mode: ScanMode,
    pub request_id: String,
}

/// What one scanner produced: an optional rewritten input (None means
/// "unchanged, carry the current value forward") plus findings.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub input: Option<NormalizedInput>,
    pub findings: Vec<Finding>,
}

impl ScanOutcome {
    /// Nothing changed, nothing found.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Findings only; the working input is carried forward.
    pub fn found(findings: Vec<Finding>) -> Self {
        Self {
            input: None,
            findings,
        }
    }

    /// A rewritten input, with any findings describing the rewrite.
    pub fn rewritten(input: NormalizedInput, findings: Vec<Finding>) -> Self {
        Self {
            input: Some(input),
            findings,
        }
    }
}

/// A scanner that failed at runtime. Per the audit contract this is
/// fatal: an incomplete finding stream must not be mistaken for a clean
/// one.
#[derive(Debug, thiserror::Error)]
#[error("scanner \"{scanner}\" failed: {message}")]
pub struct ScanError {
    pub scanner: String,
    pub message: String,
}

impl ScanError {
    pub fn new(scanner: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scanner: scanner.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner trait
// ---------------------------------------------------------------------------

/// One stage of the scanner chain.
///
/// Implementations must be `Send + Sync`: multiple audits may run
/// concurrently against the same scanner instance, so `run` must not
/// hold mutable per-audit state. Built-in scanners are synchronous
/// computations behind this async seam; only scanners that own I/O
/// (e.g. the rule-pack loader) genuinely suspend.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Unique within a chain.
    fn name(&self) -> &str;

    fn kind(&self) -> ScannerKind;

    async fn run(&self, input: &NormalizedInput, ctx: &ScanContext)
        -> Result<ScanOutcome, ScanError>;

    /// Release owned resources (watch tasks, caches). The chain runner
    /// never calls this; the owning caller opts in.
    async fn close(&self) {}
}
