//! JSON reader that tolerates the trailing commas hand-edited configs and the
//! shipped res_map tend to contain.

use serde_json::Value;
use std::borrow::Cow;

pub fn parse_relaxed(bytes: &[u8]) -> serde_json::Result<Value> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str(&strip_trailing_commas(text)),
        Err(_) => serde_json::from_slice(bytes),
    }
}

/// Drops every `,` that is followed (after whitespace) by `]` or `}`.
/// Commas inside string literals are left alone.
pub fn strip_trailing_commas(text: &str) -> Cow<'_, str> {
    if !text.contains(',') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();
    let mut changed = false;

    while let Some((pos, ch)) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let rest = &text[pos + 1..];
                let next = rest.trim_start().chars().next();
                if matches!(next, Some('}') | Some(']')) {
                    changed = true;
                } else {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}
