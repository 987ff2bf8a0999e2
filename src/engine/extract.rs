//! Locates the first complete JSON value embedded in free-form engine output.

use std::collections::HashMap;

use serde_json::Value;

/// First balanced `{...}` or `[...]` span that parses as JSON.
///
/// Brackets inside string literals are ignored. A span that balances but does
/// not parse (e.g. `[see below]`) is skipped and the scan resumes after its
/// opening bracket.
pub fn extract_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut known = HashMap::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find(['{', '[']) {
        let open = from + offset;
        let close = match known.remove(&open) {
            Some(close) => close,
            None => balanced_end(bytes, open, &mut known),
        };
        if let Some(close) = close {
            if let Ok(value) = serde_json::from_str::<Value>(&text[open..=close]) {
                return Some(value);
            }
        }
        from = open + 1;
    }
    None
}

/// Closing index of the bracket at `open`.
///
/// Every nested opener met outside a string is recorded in `known` with its
/// own closing index, or `None` when it cannot close, so it is never
/// rescanned.
fn balanced_end(
    bytes: &[u8],
    open: usize,
    known: &mut HashMap<usize, Option<usize>>,
) -> Option<usize> {
    let mut stack: Vec<(usize, u8)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push((i, b'}')),
            b'[' => stack.push((i, b']')),
            b'}' | b']' => match stack.pop() {
                Some((_, expected)) if expected == b && stack.is_empty() => return Some(i),
                Some((at, expected)) if expected == b => {
                    known.insert(at, Some(i));
                }
                Some((at, _)) => {
                    known.insert(at, None);
                    break;
                }
                None => break,
            },
            _ => {}
        }
    }
    for (at, _) in stack {
        known.insert(at, None);
    }
    None
}
