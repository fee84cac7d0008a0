// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Audit orchestration.
//
// Wires the stages together for one turn: ingress validation, L1
// normalization, the L2 scanner chain, L3 policy evaluation, and the L5
// evidence package.

use std::sync::Arc;
use std::time::Instant;

use crate::evidence::{build_evidence, EvidencePackageV0};
use crate::finding::Finding;
use crate::ingress::{AgentIngressEvent, IngressError};
use crate::normalize::{normalize, NormalizedInput};
use crate::policy::{evaluate_policy, PolicyConfig, PolicyDecision};
use crate::rulepack::loader::RulePackHandle;
use crate::rulepack::scanner::RulePackScanner;
use crate::rulepack::RulePackError;
use crate::scanners::chain::{scan_signals, ScanOptions};
use crate::scanners::contradiction::ContradictionCheck;
use crate::scanners::hidden_tags::HiddenAsciiTags;
use crate::scanners::keywords::KeywordInjection;
use crate::scanners::separators::SeparatorCollapse;
use crate::scanners::skeleton::SkeletonEnricher;
use crate::scanners::tool_args::ToolArgsCanonicalizer;
use crate::scanners::tool_boundary::{PathTraversalDetector, SsrfDetector};
use crate::scanners::unicode::UnicodeSanitizer;
use crate::scanners::{ScanError, Scanner};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the public audit entry points.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Ingress(#[from] IngressError),

    #[error(transparent)]
    RulePack(#[from] RulePackError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("failed to assemble evidence package: {0}")]
    Evidence(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Everything one audit produced.
#[derive(Debug)]
pub struct AuditOutcome {
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
    pub decision: PolicyDecision,
    pub evidence: EvidencePackageV0,
}

// ---------------------------------------------------------------------------
// Default chain
// ---------------------------------------------------------------------------

/// The canonical chain order: sanitizers, then the skeleton enricher,
/// then detectors. The runner does not enforce this ordering; it is the
/// configuration contract.
pub fn default_scanner_chain(rule_pack: RulePackHandle) -> Vec<Arc<dyn Scanner>> {
    vec![
        Arc::new(UnicodeSanitizer::new()),
        Arc::new(HiddenAsciiTags::new()),
        Arc::new(SeparatorCollapse::new()),
        Arc::new(ToolArgsCanonicalizer::new()),
        Arc::new(SkeletonEnricher::new()),
        Arc::new(RulePackScanner::with_handle(rule_pack)),
        Arc::new(KeywordInjection::new()),
        Arc::new(SsrfDetector::new()),
        Arc::new(PathTraversalDetector::new()),
        Arc::new(ContradictionCheck::new()),
    ]
}

// ---------------------------------------------------------------------------
// Auditor
// ---------------------------------------------------------------------------

/// Owns a configured chain and runs turn-scoped audits against it.
/// Instances are shareable across concurrent audits.
pub struct Auditor {
    scanners: Vec<Arc<dyn Scanner>>,
    options: ScanOptions,
    policy: PolicyConfig,
    rule_pack: RulePackHandle,
    auto_close_scanners: bool,
}

impl Auditor {
    /// The default configuration: packaged rule pack, canonical chain
    /// order, default policy.
    pub fn with_default_chain() -> Self {
        let loader = crate::rulepack::loader::RulePackLoader::from_default_pack();
        let handle = loader.handle();
        // The embedded pack has no reload mechanism to keep alive.
        drop(loader);
        Self::new(
            default_scanner_chain(handle.clone()),
            handle,
            ScanOptions::default(),
            PolicyConfig::default(),
        )
    }

    pub fn new(
        scanners: Vec<Arc<dyn Scanner>>,
        rule_pack: RulePackHandle,
        options: ScanOptions,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            scanners,
            options,
            policy,
            rule_pack,
            auto_close_scanners: false,
        }
    }

    /// Opt into `close()` forwarding to every scanner.
    pub fn auto_close_scanners(mut self, enabled: bool) -> Self {
        self.auto_close_scanners = enabled;
        self
    }

    pub fn rule_pack(&self) -> RulePackHandle {
        self.rule_pack.clone()
    }

    /// Run one audit over an ingress event.
    pub async fn run_audit(&self, event: AgentIngressEvent) -> Result<AuditOutcome, AuditError> {
        let started = Instant::now();
        let request = event.into_request()?;
        let request_id = request.request_id.clone();
        let timestamp = request.timestamp;

        let input = normalize(request);
        let report = scan_signals(input, &self.scanners, &self.options).await?;
        let decision = evaluate_policy(&report.findings, &self.policy);

        let pack_version = self.rule_pack.current().version.clone();
        let evidence = build_evidence(
            &report.input,
            &self.scanners,
            &report.findings,
            &decision,
            vec![pack_version],
            timestamp,
        )?;

        tracing::info!(
            request_id = %request_id,
            action = ?decision.action,
            risk = %decision.risk,
            findings = report.findings.len(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "audit complete"
        );

        Ok(AuditOutcome {
            input: report.input,
            findings: report.findings,
            decision,
            evidence,
        })
    }

    /// Release scanner resources when opted in via
    /// `auto_close_scanners`.
    pub async fn close(&self) {
        if !self.auto_close_scanners {
            return;
        }
        for scanner in &self.scanners {
            scanner.close().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::AgentIngressEvent;
    use crate::policy::PolicyAction;

    fn event(prompt: &str) -> AgentIngressEvent {
        AgentIngressEvent {
            request_id: Some("audit-test".to_string()),
            timestamp: Some(1_700_000_000_000),
            user_prompt: Some(prompt.to_string()),
            ..AgentIngressEvent::default()
        }
    }

    #[tokio::test]
    async fn benign_prompt_allows() {
        let auditor = Auditor::with_default_chain();
        let outcome = auditor.run_audit(event("what's the weather?")).await.unwrap();
        assert_eq!(outcome.decision.action, PolicyAction::Allow);
        assert_eq!(outcome.evidence.request_id, "audit-test");
    }

    #[tokio::test]
    async fn missing_request_id_is_an_ingress_error() {
        let auditor = Auditor::with_default_chain();
        let mut bad = event("hi");
        bad.request_id = None;
        let err = auditor.run_audit(bad).await.unwrap_err();
        assert!(matches!(err, AuditError::Ingress(_)));
    }

    #[tokio::test]
    async fn chain_order_is_recorded_in_evidence() {
        let auditor = Auditor::with_default_chain();
        let outcome = auditor.run_audit(event("hello")).await.unwrap();
        let names: Vec<&str> = outcome
            .evidence
            .scanners
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "unicode_sanitizer",
                "hidden_ascii_tags",
                "separator_collapse",
                "tool_args_canonicalizer",
                "uts39_skeleton",
                "rule_pack",
                "keyword_injection",
                "tool_args_ssrf",
                "tool_args_path_traversal",
                "contradiction_check",
            ]
        );
    }

    #[tokio::test]
    async fn meta_carries_pack_version() {
        let auditor = Auditor::with_default_chain();
        let outcome = auditor.run_audit(event("hello")).await.unwrap();
        assert_eq!(outcome.evidence.meta.rule_pack_versions.len(), 1);
        assert!(!outcome.evidence.meta.rule_pack_versions[0].is_empty());
    }
}
