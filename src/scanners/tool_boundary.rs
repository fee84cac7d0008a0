// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Tool-boundary detectors.
//
// Classify every string inside tool-call arguments:
//
// - `SsrfDetector` flags URLs whose host is a private, loopback, or
//   link-local address, or a known-internal hostname (cloud metadata
//   endpoints included). Obfuscated schemes like `h.t.t.p://` are
//   collapsed before parsing.
// - `PathTraversalDetector` flags path-looking strings containing
//   traversal segments or referencing sensitive files.
//
// Both walk the canonicalized tool-call JSON with a bounded node
// budget; exhaustion is reported in evidence, never an error.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use serde_json::Value;

use crate::finding::{Finding, FindingKind, RiskLevel, Target};
use crate::normalize::views::ViewKind;
use crate::normalize::{ChunkSource, NormalizedInput};
use crate::scanners::{ScanContext, ScanError, ScanOutcome, Scanner, ScannerKind};

pub const SSRF_NAME: &str = "tool_args_ssrf";
pub const TRAVERSAL_NAME: &str = "tool_args_path_traversal";

const DEFAULT_NODE_BUDGET: usize = 20_000;
const SNIPPET_CHARS: usize = 120;

/// Hostnames treated as internal regardless of resolution.
const SUSPICIOUS_HOSTS: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "169.254.169.254",
];

// ---------------------------------------------------------------------------
// Argument-tree walking
// ---------------------------------------------------------------------------

struct ArgStrings {
    /// (tool-call index, string value) pairs in tree order.
    strings: Vec<(usize, String)>,
    exceeded: bool,
}

/// Collect every string from the tool-call argument trees, preferring
/// the canonicalized form (already NFKC'd and stripped) over the raw
/// request when available.
fn collect_arg_strings(input: &NormalizedInput, budget: usize) -> ArgStrings {
    let calls: Value = serde_json::from_str(&input.canonical.tool_calls_json)
        .unwrap_or(Value::Null);

    let mut out = ArgStrings {
        strings: Vec::new(),
        exceeded: false,
    };
    let mut remaining = budget;

    if let Value::Array(calls) = calls {
        for (index, call) in calls.iter().enumerate() {
            if let Some(args) = call.get("args") {
                walk(args, index, &mut remaining, &mut out);
            }
        }
    }
    out
}

fn walk(value: &Value, call_index: usize, remaining: &mut usize, out: &mut ArgStrings) {
    if *remaining == 0 {
        out.exceeded = true;
        return;
    }
    *remaining -= 1;

    match value {
        Value::String(s) => out.strings.push((call_index, s.clone())),
        Value::Array(arr) => {
            for v in arr {
                walk(v, call_index, remaining, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                walk(v, call_index, remaining, out);
            }
        }
        _ => {}
    }
}

fn clip(s: &str) -> String {
    s.chars().take(SNIPPET_CHARS).collect()
}

// ---------------------------------------------------------------------------
// SSRF classification
// ---------------------------------------------------------------------------

/// Collapse separator obfuscation in the scheme only: `h.t.t.p://x`
/// becomes `http://x`. The rest of the URL is left alone.
fn collapse_scheme(s: &str) -> String {
    let Some(pos) = s.find("://") else {
        return s.to_string();
    };
    let prefix = &s[..pos];
    let collapsed: String = prefix
        .chars()
        .filter(|c| !matches!(c, '|' | '.' | '_' | '-' | '+' | ' '))
        .collect();
    let lower = collapsed.to_ascii_lowercase();
    if lower == "http" || lower == "https" {
        format!("{}{}", lower, &s[pos..])
    } else {
        s.to_string()
    }
}

/// Extract the host portion of an http(s) URL: scheme, userinfo, port,
/// path, query, and fragment stripped; IPv6 brackets removed.
fn extract_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;

    // userinfo@ before the first path separator is an obfuscation vector
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let after_userinfo = match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    };

    let host = if let Some(stripped) = after_userinfo.strip_prefix('[') {
        stripped.split(']').next().unwrap_or(stripped).to_string()
    } else {
        after_userinfo
            .split(':')
            .next()
            .unwrap_or(after_userinfo)
            .to_string()
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

fn is_suspicious_hostname(host: &str) -> bool {
    SUSPICIOUS_HOSTS.contains(&host)
        || host.ends_with(".localhost")
        || host.ends_with(".local")
}

fn blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let seg = ip.segments();
    // link-local fe80::/10, unique-local fc00::/7
    if (seg[0] & 0xffc0) == 0xfe80 || (seg[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // IPv4-mapped addresses must not bypass the IPv4 checks
    if let Some(v4) = ip.to_ipv4_mapped() {
        return blocked_ipv4(v4);
    }
    false
}

/// Classify one argument string. Returns the offending host when the
/// string addresses internal infrastructure.
fn classify_ssrf(raw: &str) -> Option<String> {
    let url = collapse_scheme(raw);
    let host = extract_host(&url)?;

    if is_suspicious_hostname(&host) {
        return Some(host);
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) if blocked_ipv4(v4) => Some(host),
        Ok(IpAddr::V6(v6)) if blocked_ipv6(v6) => Some(host),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SsrfDetector
// ---------------------------------------------------------------------------

pub struct SsrfDetector {
    node_budget: usize,
}

impl SsrfDetector {
    pub fn new() -> Self {
        Self {
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }
}

impl Default for SsrfDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for SsrfDetector {
    fn name(&self) -> &str {
        SSRF_NAME
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(
        &self,
        input: &NormalizedInput,
        ctx: &ScanContext,
    ) -> Result<ScanOutcome, ScanError> {
        if !input.features.has_tool_calls {
            return Ok(ScanOutcome::unchanged());
        }

        let args = collect_arg_strings(input, self.node_budget);
        let mut findings = Vec::new();
        let mut seen: Vec<(usize, String)> = Vec::new();

        for (call_index, value) in &args.strings {
            let Some(host) = classify_ssrf(value) else {
                continue;
            };
            let dedupe_key = (*call_index, host.clone());
            if seen.contains(&dedupe_key) {
                continue;
            }
            seen.push(dedupe_key);

            let target = Target::chunk(ViewKind::Raw, ChunkSource::Tool, *call_index);
            findings.push(
                Finding::new(
                    FindingKind::Detect,
                    SSRF_NAME,
                    &ctx.request_id,
                    &format!("{call_index}:{host}"),
                    RiskLevel::High,
                    0.8,
                    "Tool argument addresses internal or metadata endpoint",
                    target,
                )
                .with_tag("ssrf")
                .with_evidence("category", "tool_boundary")
                .with_evidence("host", host)
                .with_evidence("snippet", clip(value))
                .with_evidence("maxNodesExceeded", args.exceeded),
            );
        }

        Ok(ScanOutcome::found(findings))
    }
}

// ---------------------------------------------------------------------------
// PathTraversalDetector
// ---------------------------------------------------------------------------

/// Credential and secret file locations, plus the classic system files.
const SENSITIVE_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    ".ssh",
    ".aws",
    "id_rsa",
    "id_ed25519",
    ".env",
    ".netrc",
    "credentials.json",
    "c:\\windows\\",
];

const TRAVERSAL_MARKS: &[&str] = &["../", "..\\", "%2e%2e", "%2f", "%5c"];

/// Path-looking strings: literal separators, home/relative prefixes, or
/// percent-encoded separators hiding one.
fn looks_like_path(s: &str, lower: &str) -> bool {
    s.contains('/')
        || s.contains('\\')
        || s.starts_with('~')
        || s.starts_with('.')
        || lower.contains("%2f")
        || lower.contains("%5c")
}

struct PathHit {
    sensitive: Vec<&'static str>,
    traversal: Vec<&'static str>,
}

fn classify_path(raw: &str) -> Option<PathHit> {
    let lower = raw.to_ascii_lowercase();
    if !looks_like_path(raw, &lower) {
        return None;
    }
    let sensitive: Vec<&'static str> = SENSITIVE_PATHS
        .iter()
        .copied()
        .filter(|p| lower.contains(p))
        .collect();
    let traversal: Vec<&'static str> = TRAVERSAL_MARKS
        .iter()
        .copied()
        .filter(|m| lower.contains(m))
        .collect();
    if sensitive.is_empty() && traversal.is_empty() {
        return None;
    }
    Some(PathHit {
        sensitive,
        traversal,
    })
}

pub struct PathTraversalDetector {
    node_budget: usize,
}

impl PathTraversalDetector {
    pub fn new() -> Self {
        Self {
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }
}

impl Default for PathTraversalDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for PathTraversalDetector {
    fn name(&self) -> &str {
        TRAVERSAL_NAME
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(
        &self,
        input: &NormalizedInput,
        ctx: &ScanContext,
    ) -> Result<ScanOutcome, ScanError> {
        if !input.features.has_tool_calls {
            return Ok(ScanOutcome::unchanged());
        }

        let args = collect_arg_strings(input, self.node_budget);
        let mut findings = Vec::new();

        for (occurrence, (call_index, value)) in args.strings.iter().enumerate() {
            let Some(hit) = classify_path(value) else {
                continue;
            };
            let (risk, score, classification) = if !hit.sensitive.is_empty() {
                (RiskLevel::High, 0.8, "sensitive")
            } else {
                (RiskLevel::Medium, 0.6, "traversal")
            };

            let marks: Vec<serde_json::Value> = hit
                .sensitive
                .iter()
                .chain(hit.traversal.iter())
                .map(|m| serde_json::Value::String((*m).to_string()))
                .collect();

            let target = Target::chunk(ViewKind::Raw, ChunkSource::Tool, *call_index);
            findings.push(
                Finding::new(
                    FindingKind::Detect,
                    TRAVERSAL_NAME,
                    &ctx.request_id,
                    &format!("{call_index}:{occurrence}"),
                    risk,
                    score,
                    "Tool argument contains traversal or sensitive path",
                    target,
                )
                .with_tag("path_traversal")
                .with_evidence("category", "tool_boundary")
                .with_evidence("path", clip(value))
                .with_evidence("classification", classification)
                .with_evidence("marks", marks)
                .with_evidence("maxNodesExceeded", args.exceeded),
            );
        }

        Ok(ScanOutcome::found(findings))
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
            request_id: "boundary-test".to_string(),
        }
    }

    fn request_with_args(args: Value) -> AuditRequest {
        AuditRequest {
            request_id: "boundary-test".to_string(),
            timestamp: 1,
            user_prompt: "go".to_string(),
            retrieval_docs: vec![],
            tool_calls: vec![ToolCallRecord {
                tool_name: "fetch".to_string(),
                args,
            }],
            tool_results: vec![],
            response_text: None,
        }
    }

    // ---------------------------------------------------------------
    // URL parsing helpers
    // ---------------------------------------------------------------

    #[test]
    fn scheme_collapse_recovers_http() {
        assert_eq!(
            collapse_scheme("h.t.t.p://169.254.169.254/x"),
            "http://169.254.169.254/x"
        );
        assert_eq!(collapse_scheme("h-t-t-p-s://a.example"), "https://a.example");
        // Non-http schemes are untouched.
        assert_eq!(collapse_scheme("ftp://host"), "ftp://host");
    }

    #[test]
    fn host_extraction_handles_userinfo_port_and_brackets() {
        assert_eq!(
            extract_host("http://user@evil.example:8080/p?q#f"),
            Some("evil.example".to_string())
        );
        assert_eq!(
            extract_host("http://[::1]:8080/admin"),
            Some("::1".to_string())
        );
        assert_eq!(extract_host("not a url"), None);
    }

    #[test]
    fn blocked_ranges() {
        assert!(blocked_ipv4("127.0.0.1".parse().unwrap()));
        assert!(blocked_ipv4("10.1.2.3".parse().unwrap()));
        assert!(blocked_ipv4("172.16.0.9".parse().unwrap()));
        assert!(blocked_ipv4("192.168.1.1".parse().unwrap()));
        assert!(blocked_ipv4("169.254.0.5".parse().unwrap()));
        assert!(!blocked_ipv4("93.184.216.34".parse().unwrap()));

        assert!(blocked_ipv6("::1".parse().unwrap()));
        assert!(blocked_ipv6("fe80::1".parse().unwrap()));
        assert!(blocked_ipv6("fd00::2".parse().unwrap()));
        // IPv4-mapped loopback must not bypass the IPv4 rules.
        assert!(blocked_ipv6("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!blocked_ipv6("2606:2800:220:1::".parse().unwrap()));
    }

    // ---------------------------------------------------------------
    // SsrfDetector
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn metadata_endpoint_flagged_high() {
        let input = normalize(request_with_args(
            json!({"url": "http://169.254.169.254/latest/meta-data"}),
        ));
        let outcome = SsrfDetector::new().run(&input, &ctx()).await.unwrap();
        assert_eq!(outcome.findings.len(), 1);
        let f = &outcome.findings[0];
        assert_eq!(f.risk, RiskLevel::High);
        assert_eq!(f.evidence["host"], "169.254.169.254");
        assert_eq!(f.target.source, Some(ChunkSource::Tool));
        assert_eq!(f.target.chunk_index, Some(0));
    }

    #[tokio::test]
    async fn obfuscated_scheme_still_caught() {
        let input = normalize(request_with_args(json!({"u": "h.t.t.p://localhost/admin"})));
        let outcome = SsrfDetector::new().run(&input, &ctx()).await.unwrap();
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].evidence["host"], "localhost");
    }

    #[tokio::test]
    async fn dot_local_suffix_flagged() {
        let input = normalize(request_with_args(json!({"u": "http://printer.local/jobs"})));
        let outcome = SsrfDetector::new().run(&input, &ctx()).await.unwrap();
        assert_eq!(outcome.findings.len(), 1);
    }

    #[tokio::test]
    async fn public_urls_pass() {
        let input = normalize(request_with_args(
            json!({"url": "https://example.com/page", "other": "https://api.example.org/v1"}),
        ));
        let outcome = SsrfDetector::new().run(&input, &ctx()).await.unwrap();
        assert!(outcome.findings.is_empty());
    }

    #[tokio::test]
    async fn duplicate_hosts_deduplicated_per_call() {
        let input = normalize(request_with_args(
            json!({"a": "http://127.0.0.1/x", "b": "http://127.0.0.1/y"}),
        ));
        let outcome = SsrfDetector::new().run(&input, &ctx()).await.unwrap();
        assert_eq!(outcome.findings.len(), 1);
    }

    // ---------------------------------------------------------------
    // PathTraversalDetector
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn sensitive_path_is_high() {
        let input = normalize(request_with_args(json!({"path": "/etc/passwd"})));
        let outcome = PathTraversalDetector::new().run(&input, &ctx()).await.unwrap();
        assert_eq!(outcome.findings.len(), 1);
        let f = &outcome.findings[0];
        assert_eq!(f.risk, RiskLevel::High);
        assert_eq!(f.evidence["classification"], "sensitive");
    }

    #[tokio::test]
    async fn traversal_only_is_medium() {
        let input = normalize(request_with_args(json!({"path": "../../var/log/app.log"})));
        let outcome = PathTraversalDetector::new().run(&input, &ctx()).await.unwrap();
        let f = &outcome.findings[0];
        assert_eq!(f.risk, RiskLevel::Medium);
        assert_eq!(f.evidence["classification"], "traversal");
    }

    #[tokio::test]
    async fn percent_encoded_traversal_caught() {
        let input = normalize(request_with_args(
            json!({"path": "files%2e%2e%2fsecret"}),
        ));
        let outcome = PathTraversalDetector::new().run(&input, &ctx()).await.unwrap();
        assert_eq!(outcome.findings.len(), 1);
    }

    #[tokio::test]
    async fn ordinary_paths_pass() {
        let input = normalize(request_with_args(json!({"path": "/srv/data/report.csv"})));
        let outcome = PathTraversalDetector::new().run(&input, &ctx()).await.unwrap();
        assert!(outcome.findings.is_empty());
    }
}
