// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// The four-view surface model.
//
// Every textual surface under audit (prompt, each chunk, response)
// carries four parallel strings:
//
//   raw       -- verbatim input
//   sanitized -- raw with invisible/bidi/TAG carriers removed, NFKC-normalized
//   revealed  -- sanitized plus hidden ASCII recovered from the Unicode-TAG
//               range, substituted inline at the original position
//   skeleton  -- UTS#39 confusable skeleton of revealed
//
// Sanitizers overwrite views they own and unset downstream ones; the
// chain runner re-ensures completeness between stages, rebuilding any
// missing view from `raw` with the default transforms below.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::confusables;

// ---------------------------------------------------------------------------
// ViewKind
// ---------------------------------------------------------------------------

/// One of the four parallel views of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Raw,
    Sanitized,
    Revealed,
    Skeleton,
}

impl ViewKind {
    /// The order views are probed when matching a rule.
    pub const PROBE_ORDER: [ViewKind; 4] = [
        ViewKind::Raw,
        ViewKind::Sanitized,
        ViewKind::Revealed,
        ViewKind::Skeleton,
    ];

    /// Preference when a rule matched several views: more processed views
    /// are stronger evidence of evasion.
    pub const PREFERENCE: [ViewKind; 4] = [
        ViewKind::Revealed,
        ViewKind::Skeleton,
        ViewKind::Sanitized,
        ViewKind::Raw,
    ];

    /// Pick the canonical target view out of a matched set.
    pub fn preferred_of(matched: &[ViewKind]) -> Option<ViewKind> {
        Self::PREFERENCE.iter().copied().find(|v| matched.contains(v))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Raw => "raw",
            ViewKind::Sanitized => "sanitized",
            ViewKind::Revealed => "revealed",
            ViewKind::Skeleton => "skeleton",
        }
    }
}

impl std::fmt::Display for ViewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Character classes
// ---------------------------------------------------------------------------

/// Invisible obfuscation carriers stripped by sanitization.
pub fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200D}' // zero-width space / non-joiner / joiner
        | '\u{2060}' // word joiner
        | '\u{FEFF}' // BOM / zero-width no-break space
        | '\u{00AD}' // soft hyphen
    )
}

/// Bidirectional control characters.
pub fn is_bidi_control(c: char) -> bool {
    matches!(
        c,
        '\u{202A}'..='\u{202E}' // LRE/RLE/PDF/LRO/RLO
        | '\u{2066}'..='\u{2069}' // LRI/RLI/FSI/PDI
        | '\u{200E}' | '\u{200F}' // LRM/RLM
    )
}

/// Any code point in the Unicode TAG block (U+E0000–U+E007F).
pub fn is_tag(c: char) -> bool {
    ('\u{E0000}'..='\u{E007F}').contains(&c)
}

/// TAG code points that decode to printable ASCII (U+E0020–U+E007E).
pub fn decode_tag(c: char) -> Option<char> {
    let cp = c as u32;
    if (0xE0020..=0xE007E).contains(&cp) {
        char::from_u32(cp - 0xE0000)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Default transforms
// ---------------------------------------------------------------------------

/// Default sanitize transform: NFKC, then drop invisible, bidi, and TAG
/// characters. Idempotent.
pub fn sanitize_text(input: &str) -> String {
    input
        .nfkc()
        .filter(|c| !is_invisible(*c) && !is_bidi_control(*c) && !is_tag(*c))
        .collect()
}

/// Substitute printable-ASCII TAG code points inline at their original
/// position; non-decodable TAG characters are dropped.
pub fn decode_tags_inline(input: &str) -> String {
    input
        .chars()
        .filter_map(|c| {
            if is_tag(c) {
                decode_tag(c)
            } else {
                Some(c)
            }
        })
        .collect()
}

/// Default reveal transform: decode hidden TAG payloads inline, then
/// sanitize.
pub fn reveal_text(input: &str) -> String {
    sanitize_text(&decode_tags_inline(input))
}

// ---------------------------------------------------------------------------
// TextViewSet
// ---------------------------------------------------------------------------

/// The four parallel views of one surface. Unset views are rebuilt from
/// `raw` by `ensure`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextViewSet {
    pub raw: String,
    pub sanitized: Option<String>,
    pub revealed: Option<String>,
    pub skeleton: Option<String>,
}

impl TextViewSet {
    /// A view set with only the raw view populated.
    pub fn seed(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            sanitized: None,
            revealed: None,
            skeleton: None,
        }
    }

    /// A fully populated view set built with the default transforms.
    pub fn complete_from(raw: impl Into<String>) -> Self {
        let mut set = Self::seed(raw);
        set.ensure();
        set
    }

    /// Whether all four views are present.
    pub fn is_complete(&self) -> bool {
        self.sanitized.is_some() && self.revealed.is_some() && self.skeleton.is_some()
    }

    /// Fill any missing view from `raw` using the default transforms.
    /// The skeleton is always derived from the current revealed view so
    /// sanitizer rewrites propagate.
    pub fn ensure(&mut self) {
        if self.sanitized.is_none() {
            self.sanitized = Some(sanitize_text(&self.raw));
        }
        if self.revealed.is_none() {
            self.revealed = Some(reveal_text(&self.raw));
        }
        if self.skeleton.is_none() {
            let revealed = self.revealed.as_deref().unwrap_or(&self.raw);
            self.skeleton = Some(confusables::skeleton(revealed));
        }
    }

    /// Read a view. Falls back to `raw` for a view that has not been
    /// ensured yet.
    pub fn view(&self, kind: ViewKind) -> &str {
        match kind {
            ViewKind::Raw => &self.raw,
            ViewKind::Sanitized => self.sanitized.as_deref().unwrap_or(&self.raw),
            ViewKind::Revealed => self.revealed.as_deref().unwrap_or(&self.raw),
            ViewKind::Skeleton => self.skeleton.as_deref().unwrap_or(&self.raw),
        }
    }
}

// ---------------------------------------------------------------------------
// ViewMap
// ---------------------------------------------------------------------------

/// All surfaces of one audited turn. Surfaces are `Arc`-shared so a
/// scanner that rewrites one surface only allocates that surface anew.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewMap {
    pub prompt: Arc<TextViewSet>,
    pub chunks: Vec<Arc<TextViewSet>>,
    pub response: Option<Arc<TextViewSet>>,
}

impl ViewMap {
    /// Ensure every surface carries all four views.
    pub fn ensure_all(&mut self) {
        if !self.prompt.is_complete() {
            Arc::make_mut(&mut self.prompt).ensure();
        }
        for chunk in &mut self.chunks {
            if !chunk.is_complete() {
                Arc::make_mut(chunk).ensure();
            }
        }
        if let Some(response) = &mut self.response {
            if !response.is_complete() {
                Arc::make_mut(response).ensure();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
