//! Response content parsing: strip reasoning/fences, extract the outermost
//! JSON span, and sanitize it into something `serde_json` can parse.
//!
//! Each step is a small, independently testable pure string transform,
//! chained in sequence by [`extract_json_candidate`]. The pipeline never
//! guesses missing fields — it only repairs the surrounding text.

/// Run the full pipeline: strip a leading reasoning block, strip code
/// fences, extract the outermost JSON object/array, then sanitize it.
/// Returns `None` if no `{`/`[` is found at all.
#[must_use]
pub fn extract_json_candidate(content: &str) -> Option<String> {
    let stripped = strip_reasoning_block(content);
    let unfenced = strip_code_fences(&stripped);
    let span = extract_outermost_json(&unfenced)?;
    Some(sanitize_json_text(&span))
}

/// Strip everything up to and including the first closing tag of a leading
/// reasoning block (`</think>`, `</reasoning>`, `</scratchpad>`, ...).
#[must_use]
pub fn strip_reasoning_block(content: &str) -> String {
    const CLOSERS: &[&str] = &["</think>", "</reasoning>", "</scratchpad>", "</thinking>"];
    for closer in CLOSERS {
        if let Some(pos) = content.find(closer) {
            return content[pos + closer.len()..].to_string();
        }
    }
    content.to_string()
}

/// Strip a surrounding triple-backtick fence, optionally tagged `json`.
#[must_use]
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
        let rest = rest.trim_start_matches(['\n', '\r']);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].to_string();
        }
        return rest.to_string();
    }
    trimmed.to_string()
}

/// Extract the substring from the first `{`/`[` to the matching last
/// `}`/`]`, scanning past the first occurrence greedily to the last.
#[must_use]
pub fn extract_outermost_json(content: &str) -> Option<String> {
    let start = content.find(['{', '['])?;
    let opener = content.as_bytes()[start];
    let closer = if opener == b'{' { b'}' } else { b']' };
    let end = content.as_bytes().iter().rposition(|&b| b == closer)?;
    if end < start {
        return None;
    }
    Some(content[start..=end].to_string())
}

/// Normalize quote glyphs, strip zero-width characters, remove trailing
/// commas before `}`/`]`, quote bare property names, and escape unescaped
/// control characters inside string literals.
#[must_use]
pub fn sanitize_json_text(content: &str) -> String {
    let no_zero_width = strip_zero_width(content);
    let normalized_quotes = normalize_quotes(&no_zero_width);
    let no_trailing_commas = strip_trailing_commas(&normalized_quotes);
    let quoted_keys = quote_bare_keys(&no_trailing_commas);
    escape_control_chars(&quoted_keys)
}

fn strip_zero_width(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .collect()
}

fn normalize_quotes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Quote unquoted object keys like `{foo: 1}` → `{"foo": 1}`. Deliberately
/// conservative: only matches an identifier-looking run immediately
/// following `{` or `,` (skipping whitespace) and followed by `:`.
fn quote_bare_keys(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            out.push(c);
            if c == '"' && (i == 0 || bytes[i - 1] != b'\\') {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == '{' || c == ',' {
            out.push(c);
            i += 1;
            let mut j = i;
            while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                j += 1;
            }
            let key_start = j;
            while j < bytes.len()
                && ((bytes[j] as char).is_alphanumeric() || bytes[j] == b'_')
            {
                j += 1;
            }
            let key_end = j;
            let mut k = j;
            while k < bytes.len() && (bytes[k] as char).is_whitespace() {
                k += 1;
            }
            if key_end > key_start && k < bytes.len() && bytes[k] == b':' {
                out.push_str(&s[i..key_start]);
                out.push('"');
                out.push_str(&s[key_start..key_end]);
                out.push('"');
                i = key_end;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Escape literal control characters (`0x00..=0x1F`) found inside string
/// literals with their JSON escape sequence, leaving already-escaped
/// sequences and structural whitespace outside strings untouched.
fn escape_control_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        if c == '\\' {
            out.push(c);
            escaped = true;
            continue;
        }
        if c == '"' {
            in_string = false;
            out.push(c);
            continue;
        }
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            other if (other as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", other as u32)),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reasoning_block() {
        let content = "<think>pondering...</think>{\"a\":1}";
        assert_eq!(strip_reasoning_block(content), "{\"a\":1}");
    }

    #[test]
    fn strips_code_fences() {
        let content = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(content), "{\"a\":1}");
    }

    #[test]
    fn extracts_outermost_json_ignoring_prose() {
        let content = "here is the plan: {\"a\": [1,2]} thanks!";
        assert_eq!(
            extract_outermost_json(content).unwrap(),
            "{\"a\": [1,2]}"
        );
    }

    #[test]
    fn strips_trailing_commas() {
        let content = "{\"a\":1,\"b\":[1,2,],}";
        assert_eq!(strip_trailing_commas(content), "{\"a\":1,\"b\":[1,2]}");
    }

    #[test]
    fn quotes_bare_keys() {
        let content = "{foo: 1, bar: \"ok\"}";
        assert_eq!(quote_bare_keys(content), "{\"foo\": 1, \"bar\": \"ok\"}");
    }

    #[test]
    fn escapes_control_characters_inside_strings() {
        let content = "{\"a\":\"line one\nline two\"}";
        let cleaned = escape_control_chars(content);
        assert_eq!(cleaned, "{\"a\":\"line one\\nline two\"}");
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["a"], "line one\nline two");
    }

    #[test]
    fn full_pipeline_round_trips_to_valid_json() {
        let content = "<think>...</think>```json\n{tool_calls: [{\"a\":1,}]}\n```";
        let cleaned = extract_json_candidate(content).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert!(parsed["tool_calls"].is_array());
    }
}
