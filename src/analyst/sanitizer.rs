//! Textual rewrites applied to every generated program before it runs.
//!
//! This is a best-effort deterrent, not an isolation boundary: paths built
//! at runtime, paths held in variables and file APIs outside the gated call
//! list all pass through untouched. Unrecognized code is left alone.

use super::context::AllowList;
use super::error::{AnalystError, Result};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallFamily {
    Tabular,
    Parquet,
    Open,
}

struct GatedCall {
    pattern: Regex,
    family: CallFamily,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizeReport {
    pub code: String,
    pub quality_args_removed: usize,
    pub blocked_paths: Vec<String>,
}

impl SanitizeReport {
    pub fn changed(&self) -> bool {
        self.quality_args_removed > 0 || !self.blocked_paths.is_empty()
    }
}

pub struct Sanitizer {
    quality: Regex,
    gated: Vec<GatedCall>,
}

struct Offense {
    call_start: usize,
    literal_start: usize,
    literal_end: usize,
    path: String,
}

impl Sanitizer {
    pub fn new() -> Result<Self> {
        let quality = compile(r"(savefig\s*\([^)]*?),\s*quality\s*=\s*[^,)]+")?;
        let gated = [
            (r#"pd\.read_csv\(['"]([^'"]+)['"]"#, CallFamily::Tabular),
            (r#"pd\.read_json\(['"]([^'"]+)['"]"#, CallFamily::Tabular),
            (r#"pd\.read_excel\(['"]([^'"]+)['"]"#, CallFamily::Tabular),
            (r#"pd\.read_parquet\(['"]([^'"]+)['"]"#, CallFamily::Parquet),
            (r#"read_csv_auto\(['"]([^'"]+)['"]"#, CallFamily::Tabular),
            (r#"read_json_auto\(['"]([^'"]+)['"]"#, CallFamily::Tabular),
            (r#"read_parquet\(['"]([^'"]+)['"]"#, CallFamily::Parquet),
            (r#"\bopen\(['"]([^'"]+)['"]"#, CallFamily::Open),
        ]
        .into_iter()
        .map(|(pattern, family)| {
            Ok(GatedCall {
                pattern: compile(pattern)?,
                family,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Self { quality, gated })
    }

    /// Run both passes. Idempotent: sanitizing the output again is a no-op.
    pub fn sanitize(&self, code: &str, allow_list: &AllowList) -> SanitizeReport {
        let (code, quality_args_removed) = self.strip_quality_arguments(code);
        let (code, blocked_paths) = self.gate_paths(&code, allow_list);
        SanitizeReport {
            code,
            quality_args_removed,
            blocked_paths,
        }
    }

    /// Remove `quality=` keyword arguments from `savefig(...)` calls, keeping
    /// the rest of each call byte-for-byte.
    ///
    /// Each pass drops at most one argument per call and always shortens the
    /// text, so repeating until nothing matches terminates.
    pub fn strip_quality_arguments(&self, code: &str) -> (String, usize) {
        let mut current = code.to_string();
        let mut removed = 0;
        loop {
            let count = self.quality.find_iter(&current).count();
            if count == 0 {
                return (current, removed);
            }
            removed += count;
            current = self.quality.replace_all(&current, "$1").into_owned();
        }
    }

    /// Neutralize gated reads of paths outside the allow-list.
    ///
    /// `name = call('bad')` becomes `name = ''`. Otherwise only the path
    /// literal is emptied in place, except for the parquet family whose
    /// path is left as written.
    pub fn gate_paths(&self, code: &str, allow_list: &AllowList) -> (String, Vec<String>) {
        let mut blocked = Vec::new();
        let lines: Vec<String> = code
            .split('\n')
            .map(|line| self.gate_line(line, allow_list, &mut blocked))
            .collect();
        (lines.join("\n"), blocked)
    }

    /// Every rewrite removes the offending literal, so the loop ends once no
    /// disallowed path is left on the line.
    fn gate_line(&self, line: &str, allow_list: &AllowList, blocked: &mut Vec<String>) -> String {
        let mut current = line.to_string();
        loop {
            let Some(offense) = self.first_offense(&current, allow_list) else {
                return current;
            };
            blocked.push(offense.path.clone());

            current = match assignment_split(&current[..offense.call_start]) {
                Some(eq) => format!("{} ''", &current[..=eq]),
                None => {
                    let quote = &current[offense.literal_start..offense.literal_start + 1];
                    format!(
                        "{}{quote}{quote}{}",
                        &current[..offense.literal_start],
                        &current[offense.literal_end..]
                    )
                }
            };
        }
    }

    fn first_offense(&self, line: &str, allow_list: &AllowList) -> Option<Offense> {
        let mut first: Option<Offense> = None;
        for gated in &self.gated {
            for caps in gated.pattern.captures_iter(line) {
                let (Some(call), Some(path)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if allow_list.permits(path.as_str()) {
                    continue;
                }
                let assigned = assignment_split(&line[..call.start()]).is_some();
                if !assigned && gated.family == CallFamily::Parquet {
                    continue;
                }
                if first.as_ref().map_or(true, |f| call.start() < f.call_start) {
                    first = Some(Offense {
                        call_start: call.start(),
                        literal_start: path.start() - 1,
                        literal_end: path.end() + 1,
                        path: path.as_str().to_string(),
                    });
                }
            }
        }
        first
    }
}

/// Byte offset of a top-level assignment `=` in `prefix`, ignoring
/// comparisons, keyword arguments inside brackets and string contents.
fn assignment_split(prefix: &str) -> Option<usize> {
    let bytes = prefix.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q && (i == 0 || bytes[i - 1] != b'\\') {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'#' => return None,
            b'=' if depth == 0 => {
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                if next != b'=' && !b"=!<>".contains(&prev) {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AnalystError::Sanitize(format!("bad pattern {pattern}: {e}")))
}
