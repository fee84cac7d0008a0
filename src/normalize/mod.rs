// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// L1 normalization.
//
// `normalize` is pure, deterministic, and total: it copies the raw
// request, assembles the ordered canonical chunk list, renders canonical
// JSON strings for structured fields, computes feature flags, and seeds
// all four views for every surface so the view-closure invariant holds
// even if no scanners run.

pub mod confusables;
pub mod views;

use std::sync::Arc;

use serde::Serialize;

use crate::canonical::canonical_string;
use crate::request::{AuditRequest, ToolResultRecord};
use views::{TextViewSet, ViewMap};

// ---------------------------------------------------------------------------
// Chunk model
// ---------------------------------------------------------------------------

/// Where a canonical chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSource {
    User,
    Retrieval,
    Tool,
}

impl ChunkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkSource::User => "user",
            ChunkSource::Retrieval => "retrieval",
            ChunkSource::Tool => "tool",
        }
    }
}

impl std::fmt::Display for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the ordered canonical chunk list: the user prompt is
/// chunk 0, retrieval docs follow, tool outputs last.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCanonical {
    pub text: String,
    pub source: ChunkSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    pub chunk_index: usize,
}

// ---------------------------------------------------------------------------
// Canonical forms & features
// ---------------------------------------------------------------------------

/// Deterministic string forms of the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalForms {
    pub prompt_canonical: String,
    pub prompt_chunks_canonical: Vec<ChunkCanonical>,
    pub tool_calls_json: String,
    pub tool_results_json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_canonical: Option<String>,
}

/// Flags computed once at normalization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub has_retrieval: bool,
    pub has_tool_calls: bool,
    pub has_tool_results: bool,
    pub has_response: bool,
}

// ---------------------------------------------------------------------------
// NormalizedInput
// ---------------------------------------------------------------------------

/// The value threaded through the scanner chain. Scanners "mutate" by
/// returning a new value; the raw request is shared, and view surfaces
/// are `Arc`-shared so only a rewritten surface is reallocated.
#[derive(Debug, Clone)]
pub struct NormalizedInput {
    pub request_id: String,
    pub timestamp: i64,
    pub raw: Arc<AuditRequest>,
    pub canonical: CanonicalForms,
    pub features: Features,
    pub views: ViewMap,
}

/// Normalize an audit request. Pure and deterministic: the same request
/// always yields byte-identical canonical forms.
pub fn normalize(req: AuditRequest) -> NormalizedInput {
    let mut chunks = vec![ChunkCanonical {
        text: req.user_prompt.clone(),
        source: ChunkSource::User,
        doc_id: None,
        chunk_index: 0,
    }];
    for doc in &req.retrieval_docs {
        chunks.push(ChunkCanonical {
            text: doc.text.clone(),
            source: ChunkSource::Retrieval,
            doc_id: doc.doc_id.clone(),
            chunk_index: chunks.len(),
        });
    }
    for result in &req.tool_results {
        chunks.push(ChunkCanonical {
            text: tool_result_text(result),
            source: ChunkSource::Tool,
            doc_id: None,
            chunk_index: chunks.len(),
        });
    }

    let canonical = CanonicalForms {
        prompt_canonical: req.user_prompt.clone(),
        prompt_chunks_canonical: chunks,
        tool_calls_json: canonical_string(&json_value(&req.tool_calls)),
        tool_results_json: canonical_string(&json_value(&req.tool_results)),
        response_canonical: req.response_text.clone(),
    };

    let features = Features {
        has_retrieval: !req.retrieval_docs.is_empty(),
        has_tool_calls: !req.tool_calls.is_empty(),
        has_tool_results: !req.tool_results.is_empty(),
        has_response: req.response_text.is_some(),
    };

    let views = ViewMap {
        prompt: Arc::new(TextViewSet::complete_from(req.user_prompt.clone())),
        chunks: canonical
            .prompt_chunks_canonical
            .iter()
            .map(|c| Arc::new(TextViewSet::complete_from(c.text.clone())))
            .collect(),
        response: req
            .response_text
            .as_deref()
            .map(|r| Arc::new(TextViewSet::complete_from(r))),
    };

    NormalizedInput {
        request_id: req.request_id.clone(),
        timestamp: req.timestamp,
        raw: Arc::new(req),
        canonical,
        features,
        views,
    }
}

/// The canonical text of a tool output chunk: string results verbatim,
/// structured results as canonical JSON, failures as the error text.
fn tool_result_text(result: &ToolResultRecord) -> String {
    if let Some(data) = &result.data {
        match data {
            serde_json::Value::String(s) => s.clone(),
            other => canonical_string(other),
        }
    } else if let Some(error) = &result.error {
        error.clone()
    } else {
        String::new()
    }
}

fn json_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RetrievalDoc, ToolCallRecord};
    use serde_json::json;

    fn request() -> AuditRequest {
        AuditRequest {
            request_id: "req-norm".to_string(),
            timestamp: 1_700_000_000_000,
            user_prompt: "summarize the docs".to_string(),
            retrieval_docs: vec![
                RetrievalDoc {
                    text: "first doc".to_string(),
                    doc_id: Some("d1".to_string()),
                    source: None,
                },
                RetrievalDoc {
                    text: "second doc".to_string(),
                    doc_id: None,
                    source: Some("kb".to_string()),
                },
            ],
            tool_calls: vec![ToolCallRecord {
                tool_name: "search".to_string(),
                args: json!({"q": "docs", "limit": 3}),
            }],
            tool_results: vec![ToolResultRecord {
                tool_name: "search".to_string(),
                ok: true,
                data: Some(json!({"hits": 2})),
                error: None,
            }],
            response_text: Some("done".to_string()),
        }
    }

    // ---------------------------------------------------------------
    // Chunk assembly
    // ---------------------------------------------------------------

    #[test]
    fn chunk_order_is_prompt_retrieval_tool() {
        let input = normalize(request());
        let chunks = &input.canonical.prompt_chunks_canonical;
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].source, ChunkSource::User);
        assert_eq!(chunks[0].text, "summarize the docs");
        assert_eq!(chunks[1].source, ChunkSource::Retrieval);
        assert_eq!(chunks[1].doc_id.as_deref(), Some("d1"));
        assert_eq!(chunks[2].source, ChunkSource::Retrieval);
        assert_eq!(chunks[3].source, ChunkSource::Tool);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn tool_result_chunk_uses_canonical_json_for_structured_data() {
        let input = normalize(request());
        assert_eq!(
            input.canonical.prompt_chunks_canonical[3].text,
            r#"{"hits":2}"#
        );
    }

    #[test]
    fn tool_result_chunk_uses_error_text_on_failure() {
        let mut req = request();
        req.tool_results = vec![ToolResultRecord {
            tool_name: "search".to_string(),
            ok: false,
            data: None,
            error: Some("upstream timeout".to_string()),
        }];
        let input = normalize(req);
        assert_eq!(
            input.canonical.prompt_chunks_canonical[3].text,
            "upstream timeout"
        );
    }

    // ---------------------------------------------------------------
    // Canonical forms & features
    // ---------------------------------------------------------------

    #[test]
    fn canonical_json_forms_are_deterministic() {
        let a = normalize(request());
        let b = normalize(request());
        assert_eq!(a.canonical, b.canonical);
        assert!(a.canonical.tool_calls_json.contains(r#""toolName":"search""#));
    }

    #[test]
    fn features_reflect_presence() {
        let input = normalize(request());
        assert!(input.features.has_retrieval);
        assert!(input.features.has_tool_calls);
        assert!(input.features.has_tool_results);
        assert!(input.features.has_response);

        let minimal = normalize(AuditRequest {
            request_id: "r".to_string(),
            timestamp: 1,
            user_prompt: String::new(),
            retrieval_docs: vec![],
            tool_calls: vec![],
            tool_results: vec![],
            response_text: None,
        });
        assert!(!minimal.features.has_retrieval);
        assert!(!minimal.features.has_response);
    }

    // ---------------------------------------------------------------
    // View seeding
    // ---------------------------------------------------------------

    #[test]
    fn all_surfaces_seeded_with_complete_views() {
        let input = normalize(request());
        assert!(input.views.prompt.is_complete());
        assert_eq!(input.views.chunks.len(), 4);
        for chunk in &input.views.chunks {
            assert!(chunk.is_complete());
        }
        assert!(input.views.response.as_ref().unwrap().is_complete());
    }

    #[test]
    fn seeded_views_apply_default_transforms() {
        let mut req = request();
        req.retrieval_docs[0].text = "I\u{200B}GNORE this".to_string();
        let input = normalize(req);
        let chunk = &input.views.chunks[1];
        assert_eq!(chunk.view(views::ViewKind::Raw), "I\u{200B}GNORE this");
        assert_eq!(chunk.view(views::ViewKind::Sanitized), "IGNORE this");
    }

    #[test]
    fn empty_prompt_still_has_views() {
        let mut req = request();
        req.user_prompt = String::new();
        let input = normalize(req);
        assert!(input.views.prompt.is_complete());
        assert_eq!(input.views.prompt.view(views::ViewKind::Raw), "");
    }
}
