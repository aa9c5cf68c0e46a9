//! `{{column}}` substitution and the small transform DSL

use grid_extract::RowData;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, warn};

pub const NO_MATCH: &str = "(no match)";
pub const TRANSFORM_ERROR: &str = "(error)";

static SLICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\.slice\(\s*(-?\d+)\s*(?:,\s*(-?\d+)\s*)?\)$").expect("slice regex")
});
static REPLACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\.replace\(\s*/(.*)/([a-z]*)\s*,\s*(?:'([^']*)'|"([^"]*)")\s*\)(\.trim\(\))?$"#,
    )
    .expect("replace regex")
});
static JS_GROUP_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\$|&|\d{1,2})?").expect("group ref regex"));

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Apply one transform to a cell value. Errors become `(error)`.
pub fn apply_transform(value: &str, transform_type: Option<&str>, transform: Option<&str>) -> String {
    let (Some(kind), Some(transform)) = (
        transform_type.map(str::trim).filter(|t| !t.is_empty()),
        transform.filter(|t| !t.trim().is_empty()),
    ) else {
        return value.to_string();
    };
    if value.is_empty() {
        return String::new();
    }

    let result = match kind.to_ascii_lowercase().as_str() {
        "regex" => regex_capture(value, transform),
        "js" => js_like(value, transform),
        other => {
            warn!(transform_type = other, "unknown transform type, value left unchanged");
            Ok(value.to_string())
        }
    };
    result.unwrap_or_else(|err| {
        warn!(error = %err, "transform failed");
        TRANSFORM_ERROR.to_string()
    })
}

fn regex_capture(value: &str, pattern: &str) -> Result<String, TransformError> {
    let re = Regex::new(pattern).map_err(|err| TransformError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })?;
    Ok(match re.captures(value) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => NO_MATCH.to_string(),
    })
}

/// JS `slice` index resolution over `len` characters
fn slice_bound(index: i64, len: usize) -> usize {
    let len = len as i64;
    if index < 0 {
        (len + index).max(0) as usize
    } else {
        index.min(len) as usize
    }
}

fn js_like(value: &str, transform: &str) -> Result<String, TransformError> {
    let expr = transform.trim();
    let expr = expr.strip_prefix("value").unwrap_or(expr).trim_start();

    match expr {
        ".trim()" => return Ok(value.trim().to_string()),
        ".toLowerCase()" => return Ok(value.to_lowercase()),
        ".toUpperCase()" => return Ok(value.to_uppercase()),
        _ => {}
    }

    if let Some(caps) = SLICE.captures(expr) {
        let chars: Vec<char> = value.chars().collect();
        let parse = |m: Option<regex::Match<'_>>| m.and_then(|m| m.as_str().parse::<i64>().ok());
        let start = parse(caps.get(1)).map_or(0, |i| slice_bound(i, chars.len()));
        let end = parse(caps.get(2)).map_or(chars.len(), |i| slice_bound(i, chars.len()));
        return Ok(if start < end {
            chars[start..end].iter().collect()
        } else {
            String::new()
        });
    }

    if let Some(caps) = REPLACE.captures(expr) {
        let pattern = caps.get(1).map_or("", |m| m.as_str());
        let flags = caps.get(2).map_or("", |m| m.as_str());
        let replacement = caps
            .get(3)
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        let re = RegexBuilder::new(pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .build()
            .map_err(|err| TransformError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })?;
        let replacement = js_replacement(replacement, re.captures_len() - 1);
        let replaced = if flags.contains('g') {
            re.replace_all(value, replacement.as_str()).into_owned()
        } else {
            re.replace(value, replacement.as_str()).into_owned()
        };
        return Ok(if caps.get(5).is_some() {
            replaced.trim().to_string()
        } else {
            replaced
        });
    }

    debug!(transform, "unsupported js transform, value left unchanged");
    Ok(value.to_string())
}

/// Rewrite a JS replacement string for `Regex::replace`. `$&`, `$1`..`$99` and
/// `$$` keep their JS meaning; any other `$` is literal.
fn js_replacement(replacement: &str, groups: usize) -> String {
    JS_GROUP_REF
        .replace_all(replacement, |c: &regex::Captures<'_>| {
            match c.get(1).map(|m| m.as_str()) {
                Some("&") => "${0}".to_string(),
                Some("$") | None => "$$".to_string(),
                Some(n) => match n.parse::<usize>() {
                    Ok(group) if group >= 1 && group <= groups => format!("${{{}}}", group),
                    _ => format!("$${}", n),
                },
            }
        })
        .into_owned()
}

/// Replace every `{{header}}` present in `raw` with the transformed cell value
pub fn substitute_placeholders(
    raw: &str,
    row: Option<&RowData>,
    transform_type: Option<&str>,
    transform: Option<&str>,
) -> String {
    let Some(row) = row else {
        return raw.to_string();
    };
    if !raw.contains("{{") {
        return raw.to_string();
    }
    let mut out = raw.to_string();
    for (header, cell) in row.iter() {
        let placeholder = format!("{{{{{}}}}}", header);
        if out.contains(&placeholder) {
            let value = apply_transform(&cell.as_text(), transform_type, transform);
            out = out.replace(&placeholder, &value);
        }
    }
    out
}
