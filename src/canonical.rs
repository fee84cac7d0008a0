// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Canonical JSON.
//
// The single serialization rule used for all hash inputs, on-disk
// evidence, and transport payloads. Same semantic value, byte-identical
// output:
//
// - object keys sorted lexicographically
// - arrays preserve order
// - no insignificant whitespace
// - -0.0 normalized to 0
// - control characters escaped as \uXXXX
//
// `serde_json::Value` cannot represent cycles, functions, or bigints, so
// the defensive JS-side rules for those shapes have no Rust counterpart.

use serde_json::Value;

/// Produce canonical JSON bytes from a value.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_canonical(value, &mut buf);
    buf
}

/// Produce a canonical JSON string from a value.
pub fn canonical_string(value: &Value) -> String {
    // write_canonical only emits valid UTF-8.
    String::from_utf8(canonical_json(value)).unwrap_or_default()
}

fn write_canonical(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f == 0.0 && f.is_sign_negative() {
                    buf.extend_from_slice(b"0");
                    return;
                }
            }
            buf.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_json_string(s, buf),
        Value::Array(arr) => {
            buf.push(b'[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_canonical(v, buf);
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            buf.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_json_string(k, buf);
                buf.push(b':');
                write_canonical(&map[*k], buf);
            }
            buf.push(b'}');
        }
    }
}

fn write_json_string(s: &str, buf: &mut Vec<u8>) {
    buf.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                let hex = format!("\\u{:04x}", c as u32);
                buf.extend_from_slice(hex.as_bytes());
            }
            c => {
                let mut b = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut b).as_bytes());
            }
        }
    }
    buf.push(b'"');
}
