//! Selector candidate generation from captured element metadata

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::types::{CandidateSource, ElementMetadata, SelectorCandidate};

/// Preferred attributes and their base scores, strongest first
const PREFERRED_ATTRIBUTES: &[(&str, i32)] = &[
    ("data-testid", 90),
    ("aria-label", 90),
    ("name", 80),
    ("title", 75),
    ("alt", 70),
];

const FRAMEWORK_CLASS_PREFIXES: &[&str] = &["cdk-", "ng-", "mat-"];

const ID_SCORE: i32 = 100;
const DYNAMIC_ID_SCORE: i32 = 70;
const CLASS_SCORE: i32 = 80;
const TEXT_SCORE: i32 = 60;
const TEXT_COMBO_SCORE: i32 = 85;
const DOM_PATH_SCORE: i32 = 40;
const XPATH_SCORE: i32 = 30;

static TRAILING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5,}$").expect("digits regex"));
static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("uuid regex")
});
static EMBEDDED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(19|20)\d{2}[-_]?(0[1-9]|1[0-2])[-_]?(0[1-9]|[12]\d|3[01])")
        .expect("date regex")
});
static CSS_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[_a-zA-Z][_a-zA-Z0-9-]*$").expect("ident regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static CSS_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.#]?[\w-]+\s*\{[^}]*\}").expect("css rule regex"));
static JS_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"function\s*[\w$]*\s*\([^)]*\)\s*\{[^}]*\}").expect("js fn regex"));
static JS_DECLARATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(var|let|const)\s+[^;]*;").expect("js decl regex"));

pub fn is_css_identifier(value: &str) -> bool {
    CSS_IDENT.is_match(value)
}

/// Escape a value for use inside a double-quoted selector string
pub fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Ids that are likely regenerated on every page load
pub fn is_dynamic_id(id: &str) -> bool {
    TRAILING_DIGITS.is_match(id)
        || UUID.is_match(id)
        || EMBEDDED_DATE.is_match(id)
        || id
            .split(|c: char| c == '-' || c == '_' || c == ':' || c == '.')
            .any(is_hash_like)
}

fn is_hash_like(segment: &str) -> bool {
    segment.len() >= 6
        && segment.chars().any(|c| c.is_ascii_uppercase())
        && segment.chars().any(|c| c.is_ascii_lowercase())
        && segment.chars().any(|c| c.is_ascii_digit())
}

/// Visible text with whitespace collapsed and stray style/script fragments removed
pub fn clean_text(raw: &str) -> String {
    let text = CSS_RULE.replace_all(raw, " ");
    let text = JS_FUNCTION.replace_all(&text, " ");
    let text = JS_DECLARATION.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

pub struct CandidateGenerator {
    pub max_text_len: usize,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self { max_text_len: 100 }
    }
}

impl CandidateGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate every applicable candidate, deduplicated by selector
    pub fn generate(&self, meta: &ElementMetadata) -> Vec<SelectorCandidate> {
        self.generate_with_fallback(meta, None)
    }

    /// Like [`generate`](Self::generate), using `fallback_path` as the dom-path
    /// candidate when none was captured.
    pub fn generate_with_fallback(
        &self,
        meta: &ElementMetadata,
        fallback_path: Option<&str>,
    ) -> Vec<SelectorCandidate> {
        let tag = meta.tag().unwrap_or_default();
        let text = meta
            .element_text
            .as_deref()
            .map(clean_text)
            .filter(|t| !t.is_empty() && t.chars().count() <= self.max_text_len);

        let mut out = Vec::new();

        if let Some(id) = meta.id() {
            let selector = if is_css_identifier(id) {
                format!("#{}", id)
            } else {
                format!("[id=\"{}\"]", escape_quoted(id))
            };
            let score = if is_dynamic_id(id) {
                DYNAMIC_ID_SCORE
            } else {
                ID_SCORE
            };
            out.push(SelectorCandidate::new(selector, CandidateSource::Id, score));
        }

        for (name, base) in PREFERRED_ATTRIBUTES {
            let Some(value) = meta.attribute(name) else {
                continue;
            };
            let source = CandidateSource::Attr(name.to_string());
            let attr = format!("[{}=\"{}\"]", name, escape_quoted(value));
            out.push(SelectorCandidate::new(attr.clone(), source.clone(), *base));
            if !tag.is_empty() {
                out.push(SelectorCandidate::new(
                    format!("{}{}", tag, attr),
                    source.clone(),
                    base + 5,
                ));
                if let Some(text) = &text {
                    out.push(SelectorCandidate::new(
                        format!("{}{}:has-text(\"{}\")", tag, attr, escape_quoted(text)),
                        source,
                        base + 10,
                    ));
                }
            }
        }

        let classes: Vec<String> = meta
            .classes()
            .into_iter()
            .filter(|c| !FRAMEWORK_CLASS_PREFIXES.iter().any(|p| c.starts_with(p)))
            .filter(|c| is_css_identifier(c))
            .collect();
        if !classes.is_empty() {
            out.push(SelectorCandidate::new(
                format!("{}.{}", tag, classes.join(".")),
                CandidateSource::Class,
                CLASS_SCORE,
            ));
        }

        if let Some(text) = &text {
            let quoted = escape_quoted(text);
            out.push(SelectorCandidate::new(
                format!("{}:has-text(\"{}\")", tag, quoted),
                CandidateSource::HasText,
                TEXT_SCORE,
            ));
            if let Some(prominent) = classes.iter().find(|c| c.len() > 5) {
                out.push(SelectorCandidate::new(
                    format!("{}.{}:has-text(\"{}\")", tag, prominent, quoted),
                    CandidateSource::HasTextCombo,
                    TEXT_COMBO_SCORE,
                ));
            }
        }

        let dom_path = meta
            .dom_path
            .as_deref()
            .or(fallback_path)
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if let Some(path) = dom_path {
            out.push(SelectorCandidate::new(
                path,
                CandidateSource::DomPath,
                DOM_PATH_SCORE,
            ));
        }

        let xpath = match meta.xpath.as_deref().map(str::trim).filter(|x| !x.is_empty()) {
            Some(xpath) => Some(xpath.to_string()),
            None => meta
                .id()
                .map(|id| format!("//*[@id=\"{}\"]", escape_quoted(id))),
        };
        if let Some(xpath) = xpath {
            out.push(SelectorCandidate::new(
                xpath,
                CandidateSource::XPath,
                XPATH_SCORE,
            ));
        }

        let candidates = dedupe(out);
        debug!(count = candidates.len(), tag = %tag, "generated selector candidates");
        candidates
    }
}

/// Keep one candidate per selector string, the highest scored, at its first position
pub fn dedupe(candidates: Vec<SelectorCandidate>) -> Vec<SelectorCandidate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<SelectorCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate.selector.trim().is_empty() {
            continue;
        }
        match index.get(&candidate.selector) {
            Some(&pos) => {
                if candidate.score > out[pos].score {
                    out[pos] = candidate;
                }
            }
            None => {
                index.insert(candidate.selector.clone(), out.len());
                out.push(candidate);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn button() -> ElementMetadata {
        let mut attributes = BTreeMap::new();
        attributes.insert("data-testid".to_string(), "submit".to_string());
        attributes.insert("name".to_string(), "send".to_string());
        ElementMetadata {
            tag_name: Some("BUTTON".into()),
            element_id: Some("submit".into()),
            attributes,
            class_list: vec!["ng-star".into(), "primary-action".into(), "btn".into()],
            element_text: Some("  Send \n  now ".into()),
            dom_path: Some("form > button".into()),
            xpath: None,
        }
    }

    #[test]
    fn produces_every_rule_family() {
        let candidates = CandidateGenerator::new().generate(&button());
        let find = |sel: &str| candidates.iter().find(|c| c.selector == sel).cloned();

        assert_eq!(find("#submit").unwrap().score, 100);
        assert_eq!(find("[data-testid=\"submit\"]").unwrap().score, 90);
        assert_eq!(find("button[data-testid=\"submit\"]").unwrap().score, 95);
        assert_eq!(
            find("button[data-testid=\"submit\"]:has-text(\"Send now\")")
                .unwrap()
                .score,
            100
        );
        assert_eq!(find("button[name=\"send\"]").unwrap().score, 85);
        assert_eq!(find("button.primary-action.btn").unwrap().score, 80);
        assert_eq!(find("button:has-text(\"Send now\")").unwrap().score, 60);
        let combo = find("button.primary-action:has-text(\"Send now\")").unwrap();
        assert_eq!(combo.score, 85);
        assert_eq!(combo.source, CandidateSource::HasTextCombo);
        assert_eq!(find("form > button").unwrap().score, 40);
        assert_eq!(find("//*[@id=\"submit\"]").unwrap().score, 30);
    }

    #[test]
    fn dynamic_ids_score_lower() {
        for id in [
            "row-123456",
            "item-550e8400-e29b-41d4-a716-446655440000",
            "report_20240131",
            "btn-aZ9xQ2",
        ] {
            let meta = ElementMetadata {
                element_id: Some(id.into()),
                ..ElementMetadata::default()
            };
            let candidates = CandidateGenerator::new().generate(&meta);
            let id_candidate = candidates
                .iter()
                .find(|c| c.source.is_id())
                .expect("id candidate");
            assert_eq!(id_candidate.score, 70, "{id}");
        }
        assert!(!is_dynamic_id("submit-button"));
        assert!(!is_dynamic_id("step2"));
    }

    #[test]
    fn odd_ids_use_attribute_form() {
        let meta = ElementMetadata {
            element_id: Some("1st\"box".into()),
            ..ElementMetadata::default()
        };
        let candidates = CandidateGenerator::new().generate(&meta);
        assert_eq!(candidates[0].selector, "[id=\"1st\\\"box\"]");
        assert_eq!(candidates[0].source, CandidateSource::Id);
    }

    #[test]
    fn no_duplicate_selectors() {
        let mut meta = button();
        meta.dom_path = Some("#submit".into());
        let candidates = CandidateGenerator::new().generate(&meta);
        let unique: HashSet<_> = candidates.iter().map(|c| c.selector.clone()).collect();
        assert_eq!(unique.len(), candidates.len());
        let kept = candidates.iter().find(|c| c.selector == "#submit").unwrap();
        assert_eq!(kept.score, 100);
        assert_eq!(kept.source, CandidateSource::Id);
    }

    #[test]
    fn long_and_script_text_is_cleaned_or_skipped() {
        assert_eq!(
            clean_text("Buy .btn{color:red} now var x = 1; please"),
            "Buy now please"
        );
        assert_eq!(clean_text("Go function f(a){return a} home"), "Go home");

        let meta = ElementMetadata {
            tag_name: Some("div".into()),
            element_text: Some("x".repeat(101)),
            ..ElementMetadata::default()
        };
        assert!(CandidateGenerator::new().generate(&meta).is_empty());
    }
}
