use serde_json::Value;

/// Locate the outermost well-formed JSON object or array in program output.
///
/// Programs often print progress text around the payload, so candidates are
/// the balanced bracket pairs found in one left-to-right pass; they are tried
/// by start position and the first that parses wins. Returns `None` when
/// nothing parses.
pub fn extract_json(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(trimmed)
    {
        return Some(value);
    }

    balanced_spans(trimmed.as_bytes())
        .into_iter()
        .find_map(|(start, end)| serde_json::from_str::<Value>(&trimmed[start..=end]).ok())
}

/// Every `(open, close)` bracket pair, sorted by opening index.
///
/// Strings are honored only inside an open bracket, so quotes in the
/// surrounding text never hide a payload. A mismatched closer discards all
/// brackets still open; an unterminated one never yields a pair.
fn balanced_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut stack: Vec<(usize, u8)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
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
            b'"' if !stack.is_empty() => in_string = true,
            b'{' => stack.push((i, b'}')),
            b'[' => stack.push((i, b']')),
            b'}' | b']' => match stack.pop() {
                Some((open, close)) if close == b => spans.push((open, i)),
                Some(_) => stack.clear(),
                None => {}
            },
            _ => {}
        }
    }
    spans.sort_unstable();
    spans
}
