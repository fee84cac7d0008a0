// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Scanner chain runner.
//
// Runs scanners strictly sequentially in the order given, threading the
// working input through each stage and re-ensuring the four-view
// invariant between stages. No intra-chain parallelism.

use std::sync::Arc;
use std::time::Instant;

use crate::finding::{Finding, RiskLevel};
use crate::normalize::NormalizedInput;
use crate::scanners::{ScanContext, ScanError, ScanMode, Scanner};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Fail-fast threshold. Only `high` and `critical` are valid; `high`
/// matches both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailFastRisk {
    #[default]
    High,
    Critical,
}

impl FailFastRisk {
    pub fn tripped_by(&self, risk: RiskLevel) -> bool {
        match self {
            FailFastRisk::High => risk >= RiskLevel::High,
            FailFastRisk::Critical => risk >= RiskLevel::Critical,
        }
    }
}

/// Chain execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub mode: ScanMode,
    /// Stop after the first scanner that emitted a finding at or above
    /// `fail_fast_risk`.
    pub fail_fast: bool,
    pub fail_fast_risk: FailFastRisk,
}

/// Result of one chain run: the final working input and all findings in
/// emission order.
#[derive(Debug)]
pub struct ScanReport {
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Run the scanner chain over a normalized input.
///
/// Findings accumulate in emission order. A scanner returning `Err` is a
/// fatal audit error. With fail-fast enabled, the scanner whose findings
/// tripped the threshold finishes emitting, and no later scanner runs.
pub async fn scan_signals(
    input: NormalizedInput,
    scanners: &[Arc<dyn Scanner>],
    options: &ScanOptions,
) -> Result<ScanReport, ScanError> {
    let mut current = input;
    current.views.ensure_all();

    let ctx = ScanContext {
        mode: options.mode,
        request_id: current.request_id.clone(),
    };

    let mut findings: Vec<Finding> = Vec::new();

    for scanner in scanners {
        let started = Instant::now();
        let outcome = scanner.run(&current, &ctx).await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Some(mut next) = outcome.input {
            next.views.ensure_all();
            current = next;
        } else {
            // Views must close even when the scanner left them untouched.
            current.views.ensure_all();
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            scanner = scanner.name(),
            findings = outcome.findings.len(),
            latency_ms,
            "scanner finished"
        );

        let tripped = options.fail_fast
            && outcome
                .findings
                .iter()
                .any(|f| options.fail_fast_risk.tripped_by(f.risk));

        findings.extend(outcome.findings);

        if tripped {
            tracing::info!(
                request_id = %ctx.request_id,
                scanner = scanner.name(),
                "fail-fast threshold reached, stopping chain"
            );
            break;
        }
    }

    Ok(ScanReport {
        input: current,
        findings,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
