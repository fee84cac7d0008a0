// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Canonical request representation.
//
// These are the types every pipeline stage operates on. The ingress
// adapter produces an `AuditRequest`, the normalizer copies it into
// `NormalizedInput.raw`, and scanners that need original forms (tool
// args, verbatim text) read it from there.

use serde::{Deserialize, Serialize};

/// One audited turn of agent I/O, after ingress validation.
///
/// The struct is intentionally flat: the ingress adapter populates it,
/// the normalizer derives canonical forms and views from it, and no
/// stage mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    /// Caller-supplied correlation id. Non-empty.
    pub request_id: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    /// May be empty, never absent.
    pub user_prompt: String,
    #[serde(default)]
    pub retrieval_docs: Vec<RetrievalDoc>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

/// A retrieval chunk handed to the model alongside the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalDoc {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A tool call requested during the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    /// Parsed JSON arguments (arbitrary nested data, not a raw string).
    pub args: serde_json::Value,
}

/// The result a tool returned during the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRecord {
    pub tool_name: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
