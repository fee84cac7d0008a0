// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// UTS#39 confusables data.
//
// Parses the packaged `confusables.txt` asset (UTS#39 file format:
// `#`-prefixed comments, a `# Version: X.Y.Z` header, body lines
// `<src-hex-seq> ; <dst-hex-seq> ; <type> # comment`) into a mapping
// indexed by source sequence. Loaded once per process and cached.

use std::collections::HashMap;
use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

/// The packaged confusables data, embedded at compile time.
const CONFUSABLES_ASSET: &str = include_str!("../../assets/confusables.txt");

/// Parsed confusables mapping with the longest source-sequence length,
/// used to bound the skeleton window scan.
#[derive(Debug, Default)]
pub struct ConfusableTable {
    map: HashMap<String, String>,
    max_src_len: usize,
    version: Option<String>,
}

impl ConfusableTable {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn lookup(&self, src: &str) -> Option<&str> {
        self.map.get(src).map(String::as_str)
    }
}

/// Parse UTS#39 `confusables.txt` content. Malformed body lines are
/// skipped silently per the file-format contract.
pub fn parse_confusables(text: &str) -> ConfusableTable {
    let mut table = ConfusableTable::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            if let Some(version) = rest.trim().strip_prefix("Version:") {
                table.version = Some(version.trim().to_string());
            }
            continue;
        }

        // Strip the trailing comment, then split the data fields.
        let data = line.split('#').next().unwrap_or("");
        let mut fields = data.split(';');
        let (Some(src_field), Some(dst_field)) = (fields.next(), fields.next()) else {
            continue;
        };
        let (Some(src), Some(dst)) = (parse_hex_seq(src_field), parse_hex_seq(dst_field)) else {
            continue;
        };
        if src.is_empty() {
            continue;
        }

        let src_len = src.chars().count();
        table.max_src_len = table.max_src_len.max(src_len);
        table.map.insert(src, dst);
    }

    table
}

fn parse_hex_seq(field: &str) -> Option<String> {
    let mut out = String::new();
    for token in field.split_whitespace() {
        let cp = u32::from_str_radix(token, 16).ok()?;
        out.push(char::from_u32(cp)?);
    }
    Some(out)
}

/// The process-wide confusables table, parsed from the packaged asset on
/// first use.
pub fn table() -> &'static ConfusableTable {
    static TABLE: OnceLock<ConfusableTable> = OnceLock::new();
    TABLE.get_or_init(|| parse_confusables(CONFUSABLES_ASSET))
}

/// UTS#39 skeleton: NFKC, then a left-to-right longest-match substitution
/// through the confusables mapping. At each position the longest window
/// (up to the table's max source length) that matches a mapping key is
/// substituted; otherwise one code point is copied.
pub fn skeleton(input: &str) -> String {
    skeleton_with(table(), input)
}

pub fn skeleton_with(table: &ConfusableTable, input: &str) -> String {
    let nfkc: String = input.nfkc().collect();
    if table.is_empty() {
        return nfkc;
    }

    let chars: Vec<char> = nfkc.chars().collect();
    let mut out = String::with_capacity(nfkc.len());
    let mut i = 0;
    let mut window = String::new();

    while i < chars.len() {
        let max_len = table.max_src_len.min(chars.len() - i);
        let mut consumed = 0;
        for len in (1..=max_len).rev() {
            window.clear();
            window.extend(&chars[i..i + len]);
            if let Some(dst) = table.lookup(&window) {
                out.push_str(dst);
                consumed = len;
                break;
            }
        }
        if consumed == 0 {
            out.push(chars[i]);
            consumed = 1;
        }
        i += consumed;
    }

    out
}
