//! Client for the remote selector recovery service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::LocatorError;
use crate::types::{CandidateSource, SelectorCandidate};

pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const API_KEY_HEADER: &str = "x-api-key";

/// Step description sent to the recovery service
#[derive(Clone, Debug, Default)]
pub struct RecoveryRequest {
    pub flow_id: Option<String>,
    pub step_id: String,
    /// The recorded step as camelCase JSON
    pub step: Value,
}

impl RecoveryRequest {
    /// Wire payload: the step with every key converted to PascalCase
    pub fn payload(&self) -> Value {
        let mut payload = pascal_keys(&self.step);
        if let (Value::Object(map), Some(flow_id)) = (&mut payload, &self.flow_id) {
            map.entry("FlowId")
                .or_insert_with(|| Value::String(flow_id.clone()));
        }
        payload
    }
}

/// Reported after a remote suggestion worked
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryConfirmation {
    pub flow_id: Option<String>,
    pub step_id: String,
    pub original_selector: String,
    pub improved_selector: String,
}

#[async_trait]
pub trait RecoveryService: Send + Sync {
    /// Suggested selectors, best first
    async fn suggest(&self, request: &RecoveryRequest)
        -> Result<Vec<SelectorCandidate>, LocatorError>;

    async fn confirm(&self, confirmation: &RecoveryConfirmation) -> Result<(), LocatorError>;
}

#[derive(Clone, Debug)]
pub struct RecoveryClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RecoveryClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

pub struct HttpRecoveryService {
    client: Client,
    config: RecoveryClientConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestionEntry {
    Selector(String),
    Candidate(SelectorCandidate),
}

#[derive(Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    selectors: Vec<SuggestionEntry>,
}

impl HttpRecoveryService {
    pub fn new(config: RecoveryClientConfig) -> Result<Self, LocatorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| LocatorError::Remote(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/selectoranalysis/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.endpoint(path));
        match &self.config.api_key {
            Some(key) if !key.is_empty() => builder.header(API_KEY_HEADER, key),
            _ => builder,
        }
    }
}

#[async_trait]
impl RecoveryService for HttpRecoveryService {
    async fn suggest(
        &self,
        request: &RecoveryRequest,
    ) -> Result<Vec<SelectorCandidate>, LocatorError> {
        let response = self
            .post("resolve")
            .json(&request.payload())
            .send()
            .await
            .map_err(|err| LocatorError::Remote(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LocatorError::Remote(format!(
                "resolve returned {}: {}",
                status, text
            )));
        }

        let body: SuggestionResponse = response
            .json()
            .await
            .map_err(|err| LocatorError::Remote(format!("invalid resolve response: {err}")))?;

        let suggestions: Vec<SelectorCandidate> = body
            .selectors
            .into_iter()
            .map(|entry| match entry {
                SuggestionEntry::Selector(selector) => SelectorCandidate::new(
                    selector,
                    CandidateSource::Other("remote".to_string()),
                    0,
                ),
                SuggestionEntry::Candidate(candidate) => candidate,
            })
            .filter(|candidate| !candidate.selector.trim().is_empty())
            .collect();
        debug!(step_id = %request.step_id, count = suggestions.len(), "remote suggestions received");
        Ok(suggestions)
    }

    async fn confirm(&self, confirmation: &RecoveryConfirmation) -> Result<(), LocatorError> {
        let response = self
            .post("confirm")
            .json(confirmation)
            .send()
            .await
            .map_err(|err| LocatorError::Remote(err.to_string()))?;
        if response.status().is_success() {
            info!(
                step_id = %confirmation.step_id,
                improved = %confirmation.improved_selector,
                "recovered selector confirmed"
            );
            Ok(())
        } else {
            let status = response.status();
            warn!(step_id = %confirmation.step_id, %status, "selector confirmation rejected");
            Err(LocatorError::Remote(format!("confirm returned {}", status)))
        }
    }
}

/// `frameUrl` -> `FrameUrl`, `dom_path` -> `DomPath`, applied recursively
pub fn pascal_case(key: &str) -> String {
    key.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn pascal_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| (pascal_case(key), pascal_keys(inner)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(pascal_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Seen {
        resolve: Vec<Value>,
        confirm: Vec<Value>,
        keys: Vec<Option<String>>,
    }

    async fn spawn_server(seen: Arc<Mutex<Seen>>) -> String {
        let resolve_seen = seen.clone();
        let confirm_seen = seen.clone();
        let router = Router::new()
            .route(
                "/api/selectoranalysis/resolve",
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let seen = resolve_seen.clone();
                    async move {
                        let mut seen = seen.lock().unwrap();
                        seen.keys.push(
                            headers
                                .get("x-api-key")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                        );
                        seen.resolve.push(body);
                        Json(json!({
                            "selectors": [
                                "[data-testid=\"submit\"]",
                                {"selector": "button.primary", "source": "class", "score": 80}
                            ]
                        }))
                    }
                }),
            )
            .route(
                "/api/selectoranalysis/confirm",
                post(move |Json(body): Json<Value>| {
                    let seen = confirm_seen.clone();
                    async move {
                        seen.lock().unwrap().confirm.push(body);
                        Json(json!({"ok": true}))
                    }
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn converts_keys_to_pascal_case() {
        assert_eq!(pascal_case("frameUrl"), "FrameUrl");
        assert_eq!(pascal_case("dom_path"), "DomPath");
        let nested = pascal_keys(&json!({"boundingBox": {"x": 1}, "selectors": [{"score": 2}]}));
        assert_eq!(nested, json!({"BoundingBox": {"X": 1}, "Selectors": [{"Score": 2}]}));
    }

    #[tokio::test]
    async fn suggests_and_confirms_over_http() {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let base = spawn_server(seen.clone()).await;
        let mut config = RecoveryClientConfig::new(format!("{base}/"));
        config.api_key = Some("secret".into());
        let service = HttpRecoveryService::new(config).unwrap();

        let request = RecoveryRequest {
            flow_id: Some("flow-1".into()),
            step_id: "s1".into(),
            step: json!({"id": "s1", "selector": "#submit", "tagName": "button"}),
        };
        let suggestions = service.suggest(&request).await.unwrap();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].selector, "[data-testid=\"submit\"]");
        assert_eq!(suggestions[1].source, CandidateSource::Class);

        service
            .confirm(&RecoveryConfirmation {
                flow_id: Some("flow-1".into()),
                step_id: "s1".into(),
                original_selector: "#submit".into(),
                improved_selector: suggestions[0].selector.clone(),
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.resolve[0]["Selector"], "#submit");
        assert_eq!(seen.resolve[0]["TagName"], "button");
        assert_eq!(seen.resolve[0]["FlowId"], "flow-1");
        assert_eq!(seen.keys[0].as_deref(), Some("secret"));
        assert_eq!(seen.confirm[0]["improvedSelector"], "[data-testid=\"submit\"]");
        assert_eq!(seen.confirm[0]["stepId"], "s1");
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let mut config = RecoveryClientConfig::new("http://127.0.0.1:9");
        config.timeout = Duration::from_millis(500);
        let service = HttpRecoveryService::new(config).unwrap();
        let err = service
            .suggest(&RecoveryRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::Remote(_)));
    }
}
