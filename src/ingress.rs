// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Ingress adapter.
//
// Maps a loose agent event into a validated `AuditRequest`. Every field
// the wire shape marks optional is `Option` here so validation can name
// the missing field instead of surfacing a generic parse error.

use serde::Deserialize;

use crate::request::{AuditRequest, RetrievalDoc, ToolCallRecord, ToolResultRecord};

/// Errors raised while validating an ingress event.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("requestId is required and must be a non-empty string")]
    MissingRequestId,

    #[error("timestamp is required (milliseconds since epoch)")]
    MissingTimestamp,

    #[error("userPrompt is required (an empty string is allowed)")]
    MissingUserPrompt,

    #[error("malformed ingress event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The loose event shape accepted from agent integrations.
///
/// Required-on-the-wire fields are `Option` so `into_request` can
/// produce field-specific errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIngressEvent {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub retrieval_docs: Vec<RetrievalDoc>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    #[serde(default)]
    pub response_text: Option<String>,
}

impl AgentIngressEvent {
    /// Parse an event from a JSON value (the form most integrations hold).
    pub fn from_value(value: serde_json::Value) -> Result<Self, IngressError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Validate and convert into the canonical `AuditRequest`.
    pub fn into_request(self) -> Result<AuditRequest, IngressError> {
        let request_id = match self.request_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(IngressError::MissingRequestId),
        };
        let timestamp = self.timestamp.ok_or(IngressError::MissingTimestamp)?;
        let user_prompt = self.user_prompt.ok_or(IngressError::MissingUserPrompt)?;

        Ok(AuditRequest {
            request_id,
            timestamp,
            user_prompt,
            retrieval_docs: self.retrieval_docs,
            tool_calls: self.tool_calls,
            tool_results: self.tool_results,
            response_text: self.response_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_event() -> AgentIngressEvent {
        AgentIngressEvent {
            request_id: Some("req-1".to_string()),
            timestamp: Some(1_700_000_000_000),
            user_prompt: Some("hello".to_string()),
            ..AgentIngressEvent::default()
        }
    }

    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------

    #[test]
    fn minimal_event_converts() {
        let req = minimal_event().into_request().unwrap();
        assert_eq!(req.request_id, "req-1");
        assert_eq!(req.user_prompt, "hello");
        assert!(req.retrieval_docs.is_empty());
        assert!(req.response_text.is_none());
    }

    #[test]
    fn missing_request_id_rejected() {
        let mut event = minimal_event();
        event.request_id = None;
        let err = event.into_request().unwrap_err();
        assert!(matches!(err, IngressError::MissingRequestId));
    }

    #[test]
    fn empty_request_id_rejected() {
        let mut event = minimal_event();
        event.request_id = Some(String::new());
        let err = event.into_request().unwrap_err();
        assert!(matches!(err, IngressError::MissingRequestId));
    }

    #[test]
    fn missing_timestamp_rejected() {
        let mut event = minimal_event();
        event.timestamp = None;
        let err = event.into_request().unwrap_err();
        assert!(matches!(err, IngressError::MissingTimestamp));
    }

    #[test]
    fn empty_prompt_allowed_but_absent_prompt_rejected() {
        let mut event = minimal_event();
        event.user_prompt = Some(String::new());
        assert!(event.clone().into_request().is_ok());

        event.user_prompt = None;
        let err = event.into_request().unwrap_err();
        assert!(matches!(err, IngressError::MissingUserPrompt));
    }

    // ---------------------------------------------------------------
    // Wire parsing
    // ---------------------------------------------------------------

    #[test]
    fn from_value_accepts_full_event() {
        let event = AgentIngressEvent::from_value(json!({
            "requestId": "req-2",
            "timestamp": 1700000000000i64,
            "userPrompt": "do the thing",
            "retrievalDocs": [{"text": "doc body", "docId": "d1"}],
            "toolCalls": [{"toolName": "fetch", "args": {"url": "https://example.com"}}],
            "toolResults": [{"toolName": "fetch", "ok": true, "data": {"status": 200}}],
            "responseText": "done"
        }))
        .unwrap();

        let req = event.into_request().unwrap();
        assert_eq!(req.retrieval_docs.len(), 1);
        assert_eq!(req.tool_calls[0].tool_name, "fetch");
        assert_eq!(req.tool_results[0].ok, true);
        assert_eq!(req.response_text.as_deref(), Some("done"));
    }

    #[test]
    fn from_value_rejects_non_object() {
        let err = AgentIngressEvent::from_value(json!("just a string")).unwrap_err();
        assert!(matches!(err, IngressError::Malformed(_)));
    }

    #[test]
    fn non_string_prompt_is_malformed() {
        let err = AgentIngressEvent::from_value(json!({
            "requestId": "r",
            "timestamp": 1,
            "userPrompt": 42
        }))
        .unwrap_err();
        assert!(matches!(err, IngressError::Malformed(_)));
    }
}
