// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// L5 evidence builder.
//
// Assembles the deterministic, hash-chained evidence package: every
// section is hashed over its canonical JSON rendering, and the root
// hash covers the canonicalized package with `integrity.rootHash`
// absent. Re-running the same input yields the same root hash; nothing
// here reads the wall clock.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_json;
use crate::finding::Finding;
use crate::normalize::views::ViewMap;
use crate::normalize::{CanonicalForms, Features, NormalizedInput};
use crate::policy::PolicyDecision;
use crate::scanners::{Scanner, ScannerKind};

/// Evidence schema identifier.
pub const SCHEMA: &str = "schnabel-evidence-v0";

const PREVIEW_CHARS: usize = 80;

// ---------------------------------------------------------------------------
// Package shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerEntry {
    pub name: String,
    pub kind: ScannerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSection {
    pub canonical: CanonicalForms,
    pub features: Features,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedSection {
    pub views: ViewMap,
}

/// Digest of one raw surface: a clipped preview, the full length in
/// characters, and the content hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDigest {
    pub preview: String,
    pub length: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMeta {
    pub rule_pack_versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityItem {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    pub algo: String,
    pub root_hash: String,
    pub items: Vec<IntegrityItem>,
}

/// The deterministic evidence package.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePackageV0 {
    pub schema: String,
    pub request_id: String,
    pub generated_at_ms: i64,
    pub scanners: Vec<ScannerEntry>,
    pub normalized: NormalizedSection,
    pub scanned: ScannedSection,
    pub raw_digest: BTreeMap<String, RawDigest>,
    pub findings: Vec<Finding>,
    pub decision: PolicyDecision,
    pub meta: EvidenceMeta,
    pub integrity: Integrity,
}

impl EvidencePackageV0 {
    /// On-disk file name convention: `<requestId>.<generatedAtMs>.json`.
    pub fn file_name(&self) -> String {
        format!("{}.{}.json", self.request_id, self.generated_at_ms)
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Assemble and hash the evidence package.
///
/// `generated_at_ms` is caller-supplied (normally the request
/// timestamp) so the package stays deterministic.
pub fn build_evidence(
    input: &NormalizedInput,
    scanners: &[std::sync::Arc<dyn Scanner>],
    findings: &[Finding],
    decision: &PolicyDecision,
    rule_pack_versions: Vec<String>,
    generated_at_ms: i64,
) -> Result<EvidencePackageV0, serde_json::Error> {
    let mut raw_digest = BTreeMap::new();
    raw_digest.insert(
        "prompt".to_string(),
        digest_of(&input.raw.user_prompt),
    );
    for (i, chunk) in input.canonical.prompt_chunks_canonical.iter().enumerate() {
        raw_digest.insert(format!("chunk:{i}"), digest_of(&chunk.text));
    }
    if let Some(response) = &input.raw.response_text {
        raw_digest.insert("response".to_string(), digest_of(response));
    }

    let mut package = EvidencePackageV0 {
        schema: SCHEMA.to_string(),
        request_id: input.request_id.clone(),
        generated_at_ms,
        scanners: scanners
            .iter()
            .map(|s| ScannerEntry {
                name: s.name().to_string(),
                kind: s.kind(),
            })
            .collect(),
        normalized: NormalizedSection {
            canonical: input.canonical.clone(),
            features: input.features,
        },
        scanned: ScannedSection {
            views: input.views.clone(),
        },
        raw_digest,
        findings: findings.to_vec(),
        decision: decision.clone(),
        meta: EvidenceMeta {
            rule_pack_versions,
        },
        integrity: Integrity {
            algo: "sha256".to_string(),
            root_hash: String::new(),
            items: Vec::new(),
        },
    };

    package.integrity.items = vec![
        section_item("scanners", &package.scanners)?,
        section_item("normalized", &package.normalized)?,
        section_item("scanned", &package.scanned)?,
        section_item("rawDigest", &package.raw_digest)?,
        section_item("findings", &package.findings)?,
        section_item("decision", &package.decision)?,
        section_item("meta", &package.meta)?,
    ];
    package.integrity.root_hash = root_hash(&package)?;

    Ok(package)
}

fn digest_of(text: &str) -> RawDigest {
    RawDigest {
        preview: text.chars().take(PREVIEW_CHARS).collect(),
        length: text.chars().count(),
        hash: sha256_hex(text.as_bytes()),
    }
}

fn section_item<T: Serialize>(name: &str, section: &T) -> Result<IntegrityItem, serde_json::Error> {
    let value = serde_json::to_value(section)?;
    Ok(IntegrityItem {
        name: name.to_string(),
        hash: sha256_hex(&canonical_json(&value)),
    })
}

/// sha256 of the canonicalized package with `integrity.rootHash` absent.
fn root_hash(package: &EvidencePackageV0) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(package)?;
    if let Some(integrity) = value.get_mut("integrity").and_then(|v| v.as_object_mut()) {
        integrity.remove("rootHash");
    }
    Ok(sha256_hex(&canonical_json(&value)))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
