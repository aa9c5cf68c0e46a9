//! Core types for locator candidates

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Strategy that produced a selector candidate
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CandidateSource {
    Id,
    /// `attr:<name>`
    Attr(String),
    Class,
    HasText,
    HasTextCombo,
    DomPath,
    XPath,
    DevTools,
    /// Recorded source this engine does not know; kept verbatim
    Other(String),
}

impl CandidateSource {
    pub fn is_id(&self) -> bool {
        matches!(self, CandidateSource::Id)
    }
}

impl Default for CandidateSource {
    fn default() -> Self {
        CandidateSource::Other("recorded".to_string())
    }
}

impl From<String> for CandidateSource {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "id" => CandidateSource::Id,
            "class" => CandidateSource::Class,
            "has-text" => CandidateSource::HasText,
            "has-text-combo" => CandidateSource::HasTextCombo,
            "dom-path" => CandidateSource::DomPath,
            "xpath" => CandidateSource::XPath,
            "devtools" => CandidateSource::DevTools,
            _ => match raw.strip_prefix("attr:") {
                Some(name) => CandidateSource::Attr(name.to_string()),
                None => CandidateSource::Other(raw),
            },
        }
    }
}

impl From<CandidateSource> for String {
    fn from(source: CandidateSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateSource::Id => f.write_str("id"),
            CandidateSource::Attr(name) => write!(f, "attr:{}", name),
            CandidateSource::Class => f.write_str("class"),
            CandidateSource::HasText => f.write_str("has-text"),
            CandidateSource::HasTextCombo => f.write_str("has-text-combo"),
            CandidateSource::DomPath => f.write_str("dom-path"),
            CandidateSource::XPath => f.write_str("xpath"),
            CandidateSource::DevTools => f.write_str("devtools"),
            CandidateSource::Other(raw) => f.write_str(raw),
        }
    }
}

/// Outcome of validating one candidate against the live page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchFailureReason {
    NoMatch,
    NotVisible,
    Disabled,
    BboxMismatch,
    BboxError,
    MaybeOk,
    MultipleMatch,
    MultipleMatchResolved,
    Error(String),
}

impl MatchFailureReason {
    pub fn score_delta(&self) -> i32 {
        match self {
            MatchFailureReason::MaybeOk => 20,
            MatchFailureReason::MultipleMatchResolved => 10,
            MatchFailureReason::BboxMismatch | MatchFailureReason::BboxError => -15,
            MatchFailureReason::MultipleMatch => -10,
            MatchFailureReason::NoMatch | MatchFailureReason::Error(_) => -20,
            MatchFailureReason::NotVisible | MatchFailureReason::Disabled => 0,
        }
    }

    pub fn is_replayable(&self) -> bool {
        matches!(
            self,
            MatchFailureReason::MaybeOk | MatchFailureReason::MultipleMatchResolved
        )
    }
}

impl From<String> for MatchFailureReason {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "no-match" => MatchFailureReason::NoMatch,
            "not-visible" => MatchFailureReason::NotVisible,
            "disabled" => MatchFailureReason::Disabled,
            "bbox-mismatch" => MatchFailureReason::BboxMismatch,
            "bbox-error" => MatchFailureReason::BboxError,
            "maybe-ok" => MatchFailureReason::MaybeOk,
            "multiple-match" => MatchFailureReason::MultipleMatch,
            "multiple-match-resolved" => MatchFailureReason::MultipleMatchResolved,
            _ => MatchFailureReason::Error(
                raw.strip_prefix("error:").unwrap_or(&raw).trim().to_string(),
            ),
        }
    }
}

impl From<MatchFailureReason> for String {
    fn from(reason: MatchFailureReason) -> Self {
        reason.to_string()
    }
}

impl fmt::Display for MatchFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchFailureReason::NoMatch => f.write_str("no-match"),
            MatchFailureReason::NotVisible => f.write_str("not-visible"),
            MatchFailureReason::Disabled => f.write_str("disabled"),
            MatchFailureReason::BboxMismatch => f.write_str("bbox-mismatch"),
            MatchFailureReason::BboxError => f.write_str("bbox-error"),
            MatchFailureReason::MaybeOk => f.write_str("maybe-ok"),
            MatchFailureReason::MultipleMatch => f.write_str("multiple-match"),
            MatchFailureReason::MultipleMatchResolved => f.write_str("multiple-match-resolved"),
            MatchFailureReason::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

fn lenient_score<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.map(|v| v.round() as i32).unwrap_or_default())
}

/// One proposed way to locate an element
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorCandidate {
    pub selector: String,
    #[serde(default)]
    pub source: CandidateSource,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: i32,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub replayable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_failure_reason: Option<MatchFailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_index: Option<usize>,
}

impl SelectorCandidate {
    pub fn new(selector: impl Into<String>, source: CandidateSource, score: i32) -> Self {
        Self {
            selector: selector.into(),
            source,
            score,
            verified: false,
            replayable: false,
            match_failure_reason: None,
            match_index: None,
        }
    }

    /// Apply a validation outcome. Only the validator calls this.
    pub(crate) fn apply_outcome(&mut self, reason: MatchFailureReason, match_index: Option<usize>) {
        self.score += reason.score_delta();
        self.replayable = reason.is_replayable();
        self.verified = self.replayable;
        self.match_index = match_index;
        self.match_failure_reason = Some(reason);
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassListRepr {
    List(Vec<String>),
    Joined(String),
}

fn class_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<ClassListRepr>::deserialize(deserializer)? {
        Some(ClassListRepr::List(list)) => list,
        Some(ClassListRepr::Joined(joined)) => {
            joined.split_whitespace().map(str::to_string).collect()
        }
        None => Vec::new(),
    })
}

/// Element facts captured at record time
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMetadata {
    #[serde(default, alias = "tag")]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub element_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "class_list")]
    pub class_list: Vec<String>,
    #[serde(default, alias = "innerText")]
    pub element_text: Option<String>,
    #[serde(default)]
    pub dom_path: Option<String>,
    #[serde(default)]
    pub xpath: Option<String>,
}

impl ElementMetadata {
    pub fn tag(&self) -> Option<String> {
        self.tag_name
            .as_deref()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
    }

    pub fn id(&self) -> Option<&str> {
        self.element_id
            .as_deref()
            .or_else(|| self.attributes.get("id").map(String::as_str))
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Recorded class names, also read from the `class` attribute
    pub fn classes(&self) -> Vec<String> {
        if !self.class_list.is_empty() {
            return self.class_list.clone();
        }
        self.attributes
            .get("class")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_parses_recorded_json() {
        let raw = r##"{"selector":"#submit","source":"id","score":100.0}"##;
        let candidate: SelectorCandidate = serde_json::from_str(raw).unwrap();
        assert_eq!(candidate.source, CandidateSource::Id);
        assert_eq!(candidate.score, 100);
        assert!(!candidate.replayable);

        let raw = r#"{"selector":"[name=\"q\"]","source":"attr:name","matchFailureReason":"error: boom"}"#;
        let candidate: SelectorCandidate = serde_json::from_str(raw).unwrap();
        assert_eq!(candidate.source, CandidateSource::Attr("name".into()));
        assert_eq!(
            candidate.match_failure_reason,
            Some(MatchFailureReason::Error("boom".into()))
        );
    }

    #[test]
    fn sources_round_trip_as_strings() {
        for raw in ["id", "attr:data-testid", "has-text-combo", "dom-path", "css"] {
            let source = CandidateSource::from(raw.to_string());
            assert_eq!(source.to_string(), raw);
        }
        assert_eq!(
            CandidateSource::from("css".to_string()),
            CandidateSource::Other("css".into())
        );
    }

    #[test]
    fn outcome_keeps_replayable_implies_verified() {
        let mut c = SelectorCandidate::new("#a", CandidateSource::Id, 100);
        c.apply_outcome(MatchFailureReason::MaybeOk, None);
        assert!(c.verified && c.replayable);
        assert_eq!(c.score, 120);

        c.apply_outcome(MatchFailureReason::NoMatch, None);
        assert!(!c.verified && !c.replayable);
        assert_eq!(c.score, 100);
    }

    #[test]
    fn metadata_accepts_joined_class_list() {
        let meta: ElementMetadata = serde_json::from_str(
            r#"{"tagName":"BUTTON","classList":"btn primary","attributes":{"id":"go"}}"#,
        )
        .unwrap();
        assert_eq!(meta.tag().as_deref(), Some("button"));
        assert_eq!(meta.classes(), vec!["btn", "primary"]);
        assert_eq!(meta.id(), Some("go"));
    }
}
